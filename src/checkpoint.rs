//! Range bookkeeping: block ranges, the resume planner, and the on-disk
//! checkpoint artifacts it reads coverage from.

pub mod planner;
pub mod range;
pub mod store;

pub use planner::{HarvestPlan, RangePlanner, DEFAULT_STEP_SIZE};
pub use range::BlockRange;
pub use store::CheckpointStore;
