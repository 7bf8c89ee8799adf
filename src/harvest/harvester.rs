use super::fetcher::{ChunkFetcher, ChunkFetcherParams, ErrorBudget};
use super::worker_pool::WorkerPool;
use crate::checkpoint::{BlockRange, CheckpointStore, RangePlanner};
use crate::events::{EventKind, EventRecord};
use crate::rpc::client::{LogQuery, LogSource};
use crate::runtime::config::HarvestConfig;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry};
use alloy_primitives::Address;
use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What to harvest: one event kind from one contract, checkpointed under `tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestQuery {
    pub contract: Address,
    pub kind: EventKind,
    pub tag: String,
}

impl HarvestQuery {
    pub fn new(contract: Address, kind: EventKind, tag: impl Into<String>) -> Self {
        Self {
            contract,
            kind,
            tag: tag.into(),
        }
    }
}

/// Resumable, chunked event extraction over a closed block interval.
///
/// Pending chunks are fetched by a bounded worker pool and committed as
/// checkpoint artifacts; once every worker has finished, the artifacts are
/// read back in block order.
pub struct EventHarvester {
    config: HarvestConfig,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
}

impl EventHarvester {
    pub fn new(config: HarvestConfig) -> Self {
        Self::with_cancellation_token(config, CancellationToken::new())
    }

    /// Harvests are cancelled together with `shutdown`.
    pub fn with_cancellation_token(config: HarvestConfig, shutdown: CancellationToken) -> Self {
        Self {
            config,
            telemetry: Arc::new(Telemetry::default()),
            shutdown,
        }
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Counters accumulated over every harvest run by this instance.
    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub async fn harvest(
        &self,
        source: Arc<dyn LogSource>,
        query: &HarvestQuery,
        from: u64,
        to: u64,
    ) -> Result<Vec<EventRecord>> {
        let span = BlockRange::span(from, to)?;
        let store = CheckpointStore::new(self.config.checkpoint_dir(), &query.tag, query.kind)?;
        let planner = RangePlanner::new(self.config.step_size());
        let plan = planner.plan_with_store(from, to, &store).await?;
        let covered = plan.artifacts.len() - plan.pending.len();
        self.telemetry.record_plan(plan.pending.len(), covered);

        tracing::info!(
            tag = %query.tag,
            kind = %query.kind,
            from_block = from,
            to_block = to,
            pending = plan.pending.len(),
            covered,
            "harvest planned"
        );

        if !plan.is_complete() {
            self.fetch_pending(source, query, &store, plan.pending.clone())
                .await?;
        }

        let mut records = Vec::new();
        for (_, path) in &plan.artifacts {
            records.extend(store.read_path(path).await?);
        }

        let records = trim_to_span(records, span);
        tracing::info!(
            tag = %query.tag,
            kind = %query.kind,
            records = records.len(),
            "harvest complete"
        );
        Ok(records)
    }

    async fn fetch_pending(
        &self,
        source: Arc<dyn LogSource>,
        query: &HarvestQuery,
        store: &CheckpointStore,
        pending: Vec<BlockRange>,
    ) -> Result<()> {
        let run_token = self.shutdown.child_token();
        let fatal_handler = FatalErrorHandler::new(run_token.clone());
        let budget = Arc::new(ErrorBudget::new(self.config.max_fetch_errors()));

        let fetcher = Arc::new(ChunkFetcher::new(ChunkFetcherParams {
            source,
            store: store.clone(),
            query: LogQuery::new(query.contract, query.kind, pending[0]),
            request_span: self.config.request_span(),
            initial_backoff: self.config.retry_initial_backoff(),
            max_backoff: self.config.retry_max_backoff(),
            budget,
            telemetry: self.telemetry.clone(),
            cancellation: run_token.clone(),
        }));

        let reporter_token = run_token.child_token();
        let reporter = spawn_metrics_reporter(
            self.telemetry.clone(),
            reporter_token.clone(),
            self.config.metrics_interval(),
        );

        let mut pool = WorkerPool::new(self.config.pool_size(pending.len()));
        tracing::debug!(workers = pool.workers(), chunks = pending.len(), "launching workers");
        pool.launch(fetcher, pending, run_token.clone(), fatal_handler.clone());
        pool.join(&fatal_handler).await;

        reporter_token.cancel();
        let _ = reporter.await;

        if let Some(err) = fatal_handler.take_error() {
            return Err(err);
        }
        if run_token.is_cancelled() {
            return Err(anyhow!("harvest of {} {} cancelled", query.tag, query.kind));
        }
        Ok(())
    }
}

/// Keeps the records inside `span`, preserving order.
fn trim_to_span(records: Vec<EventRecord>, span: BlockRange) -> Vec<EventRecord> {
    if records.is_empty() {
        return records;
    }
    records
        .into_iter()
        .filter(|record| span.contains(record.block_number()))
        .collect()
}
