//! The log-fetch primitive consumed by the harvester and its JSON-RPC
//! implementation against an EVM node.

use crate::checkpoint::BlockRange;
use crate::error::HarvestError;
use crate::events::{EventKind, EventRecord};
use crate::rpc::decode::{decode_logs, format_quantity, parse_quantity, RawLog};
use crate::rpc::metrics::{RpcMetrics, RpcMetricsSnapshot};
use crate::rpc::options::RpcClientOptions;
use crate::runtime::config::HarvestConfig;
use alloy_primitives::{hex, Address};
use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde_json::json;
use std::sync::Arc;
use tokio::time::{timeout, Instant};

const GET_LOGS: &str = "eth_getLogs";
const BLOCK_NUMBER: &str = "eth_blockNumber";

/// One request window: logs of `kind` emitted by `contract` within `range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogQuery {
    pub contract: Address,
    pub kind: EventKind,
    pub range: BlockRange,
}

impl LogQuery {
    pub fn new(contract: Address, kind: EventKind, range: BlockRange) -> Self {
        Self {
            contract,
            kind,
            range,
        }
    }

    pub fn with_range(&self, range: BlockRange) -> Self {
        Self { range, ..*self }
    }
}

/// Fetch primitive used by the harvester workers.
///
/// A call that exceeds its deadline must fail with
/// [`HarvestError::TransientFetch`]; every other failure is reported as-is.
pub trait LogSource: Send + Sync {
    fn get_logs<'a>(&'a self, query: &'a LogQuery) -> BoxFuture<'a, Result<Vec<EventRecord>>>;
}

#[derive(Debug, Clone)]
pub struct EthLogsClient {
    rpc_url: Arc<String>,
    client: HttpClient,
    options: RpcClientOptions,
    metrics: Arc<RpcMetrics>,
}

impl LogSource for EthLogsClient {
    fn get_logs<'a>(&'a self, query: &'a LogQuery) -> BoxFuture<'a, Result<Vec<EventRecord>>> {
        Box::pin(self.get_logs(query))
    }
}

impl EthLogsClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_options(url, RpcClientOptions::default())
    }

    pub fn with_options(url: impl Into<String>, options: RpcClientOptions) -> Result<Self> {
        options.validate()?;

        let rpc_url = url.into();
        let max_response_body_size = options.max_response_body_bytes.min(u32::MAX as usize) as u32;

        // The jsonrpsee deadline sits above ours so `timeout` below
        // fires first and the window gets classified as transient.
        let client = HttpClientBuilder::default()
            .request_timeout(options.request_timeout.saturating_mul(2))
            .max_concurrent_requests(options.max_concurrent_requests)
            .max_response_size(max_response_body_size)
            .build(&rpc_url)
            .map_err(|err| anyhow!("failed to build RPC client for {rpc_url}: {err}"))?;

        Ok(Self {
            rpc_url: Arc::new(rpc_url),
            client,
            options,
            metrics: Arc::new(RpcMetrics::default()),
        })
    }

    pub fn from_config(config: &HarvestConfig) -> Result<Self> {
        config.validate()?;
        let options = RpcClientOptions {
            request_timeout: config.rpc_timeout(),
            max_concurrent_requests: std::cmp::max(16, config.max_workers().saturating_mul(4)),
            ..RpcClientOptions::default()
        };
        Self::with_options(config.rpc_url().to_owned(), options)
    }

    pub fn endpoint(&self) -> &str {
        &self.rpc_url
    }

    pub fn metrics(&self) -> RpcMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn get_logs(&self, query: &LogQuery) -> Result<Vec<EventRecord>> {
        let filter = log_filter(query);
        let start = Instant::now();

        let response: Result<Vec<RawLog>> = match timeout(
            self.options.request_timeout,
            self.client.request(GET_LOGS, rpc_params![filter]),
        )
        .await
        {
            Err(_) => Err(HarvestError::TransientFetch { range: query.range }.into()),
            Ok(result) => result.map_err(|err| map_rpc_error(GET_LOGS, Some(query.range), err)),
        };

        let logs = match response {
            Ok(logs) => logs,
            Err(err) => {
                if crate::error::is_transient(&err) {
                    self.metrics.record_timeout(start.elapsed());
                } else {
                    self.metrics.record_failure(start.elapsed());
                }
                return Err(err);
            }
        };
        self.metrics.record_success(start.elapsed(), logs.len());

        tracing::trace!(
            contract = %query.contract,
            kind = %query.kind,
            from_block = query.range.from(),
            to_block = query.range.to(),
            logs = logs.len(),
            "eth_getLogs completed"
        );

        decode_logs(query.kind, &logs)
            .with_context(|| format!("failed to decode logs for blocks {}", query.range))
    }

    /// Latest block number known to the node.
    pub async fn block_number(&self) -> Result<u64> {
        let raw: String = timeout(
            self.options.request_timeout,
            self.client.request(BLOCK_NUMBER, rpc_params![]),
        )
        .await
        .map_err(|_| anyhow!("rpc {BLOCK_NUMBER} timed out"))?
        .map_err(|err| map_rpc_error(BLOCK_NUMBER, None, err))?;
        parse_quantity(&raw).with_context(|| format!("rpc {BLOCK_NUMBER} returned {raw:?}"))
    }
}

fn log_filter(query: &LogQuery) -> serde_json::Value {
    let mut filter = json!({
        "address": hex::encode_prefixed(query.contract),
        "fromBlock": format_quantity(query.range.from()),
        "toBlock": format_quantity(query.range.to()),
    });
    if let Some(topic0) = query.kind.topic0() {
        filter["topics"] = json!([hex::encode_prefixed(topic0)]);
    }
    filter
}

fn map_rpc_error(method: &'static str, range: Option<BlockRange>, err: JsonRpcError) -> anyhow::Error {
    match (err, range) {
        (JsonRpcError::RequestTimeout, Some(range)) => HarvestError::TransientFetch { range }.into(),
        (JsonRpcError::RequestTimeout, None) => anyhow!("rpc {method} timed out"),
        (JsonRpcError::Call(call), _) => anyhow!(
            "rpc {method} call failed (code={}, message={})",
            call.code(),
            call.message()
        ),
        (err, _) => anyhow!("rpc {method} call failed: {err}"),
    }
}
