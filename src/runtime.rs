//! Runtime glue: configuration, the snapshot plan, telemetry, fatal error
//! propagation and the runner that ties the stages together.

pub mod config;
pub mod fatal;
pub mod plan;
pub mod runner;
pub mod telemetry;
