//! JSON-RPC plumbing: the `LogSource` fetch primitive, the `eth_getLogs`
//! client, log decoding and request metrics.

pub mod client;
pub mod decode;
pub mod metrics;
pub mod options;

pub use client::{EthLogsClient, LogQuery, LogSource};
pub use decode::{decode_log, decode_logs, RawLog};
pub use metrics::RpcMetricsSnapshot;
pub use options::RpcClientOptions;
