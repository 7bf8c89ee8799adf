pub mod checkpoint;
pub mod contributions;
pub mod error;
pub mod events;
pub mod harvest;
pub mod ledger;
pub mod output;
pub mod rewards;
pub mod rpc;
pub mod runtime;
pub mod units;

pub use checkpoint::{BlockRange, CheckpointStore, HarvestPlan, RangePlanner};
pub use contributions::{AliasMap, Contribution, Role, TokenHolders};
pub use error::{is_transient, HarvestError};
pub use events::{EventKind, EventRecord};
pub use harvest::{EventHarvester, HarvestQuery};
pub use output::{OutputWriter, SnapshotReport};
pub use rewards::{Distribution, RewardAllocator, RewardPool};
pub use rpc::{EthLogsClient, LogQuery, LogSource, RpcClientOptions};
pub use runtime::config::{HarvestConfig, HarvestConfigBuilder, HarvestConfigParams};
pub use runtime::plan::AirdropPlan;
pub use runtime::runner::{RunSummary, Runner};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
