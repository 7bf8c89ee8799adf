//! Walks one chunk in request windows and commits it as a checkpoint.
//!
//! Per chunk: `Planned -> Fetching -> {Committed | Shrinking -> Fetching | Aborted}`.
//! Timeouts shrink the window and retry the same start block without
//! touching the error budget, until the window is at its floor. Every other
//! failure is charged to the budget shared by all workers of the run.

use super::backoff::RetryBackoff;
use super::sizer::SpanSizer;
use crate::checkpoint::{BlockRange, CheckpointStore};
use crate::error::{is_transient, HarvestError};
use crate::rpc::client::{LogQuery, LogSource};
use crate::runtime::telemetry::Telemetry;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Counted-failure allowance for one harvest call.
#[derive(Debug)]
pub(crate) struct ErrorBudget {
    max_errors: usize,
    errors: AtomicUsize,
}

impl ErrorBudget {
    pub(crate) fn new(max_errors: usize) -> Self {
        Self {
            max_errors,
            errors: AtomicUsize::new(0),
        }
    }

    /// Charges one failure; past the allowance the run is aborted with `err`.
    pub(crate) fn charge(&self, err: anyhow::Error) -> Result<anyhow::Error> {
        let errors = self.errors.fetch_add(1, Ordering::SeqCst) + 1;
        if errors > self.max_errors {
            return Err(HarvestError::FetchAborted { errors, source: err }.into());
        }
        Ok(err)
    }

    pub(crate) fn spent(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

pub(crate) struct ChunkFetcherParams {
    pub source: Arc<dyn LogSource>,
    pub store: CheckpointStore,
    pub query: LogQuery,
    pub request_span: u64,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub budget: Arc<ErrorBudget>,
    pub telemetry: Arc<Telemetry>,
    pub cancellation: CancellationToken,
}

pub(crate) struct ChunkFetcher {
    source: Arc<dyn LogSource>,
    store: CheckpointStore,
    query: LogQuery,
    request_span: u64,
    initial_backoff: Duration,
    max_backoff: Duration,
    budget: Arc<ErrorBudget>,
    telemetry: Arc<Telemetry>,
    cancellation: CancellationToken,
}

impl ChunkFetcher {
    pub(crate) fn new(params: ChunkFetcherParams) -> Self {
        Self {
            source: params.source,
            store: params.store,
            query: params.query,
            request_span: params.request_span,
            initial_backoff: params.initial_backoff,
            max_backoff: params.max_backoff,
            budget: params.budget,
            telemetry: params.telemetry,
            cancellation: params.cancellation,
        }
    }

    /// Fetches every record of `chunk` and writes its artifact.
    pub(crate) async fn fetch_chunk(&self, chunk: BlockRange) -> Result<PathBuf> {
        let mut sizer = SpanSizer::new(self.request_span);
        let mut backoff = RetryBackoff::new(self.initial_backoff, self.max_backoff);
        let mut records = Vec::new();
        let mut cursor = chunk.from();
        let mut attempt = 0usize;

        loop {
            if self.cancellation.is_cancelled() {
                bail!("harvest cancelled while fetching blocks {chunk}");
            }

            let window = BlockRange::new(cursor, chunk.to())?.window(sizer.get_span());
            attempt += 1;

            let err = match self.source.get_logs(&self.query.with_range(window)).await {
                Ok(batch) => {
                    self.telemetry.record_fetch(batch.len());
                    records.extend(batch);
                    backoff.reset();
                    attempt = 0;
                    if window.to() == chunk.to() {
                        break;
                    }
                    cursor = window.to() + 1;
                    continue;
                }
                Err(err) => err,
            };

            if is_transient(&err) {
                let shrunk = sizer.shrink_on_timeout();
                self.telemetry.record_timeout(shrunk);
                if shrunk {
                    tracing::debug!(
                        kind = %self.query.kind,
                        from_block = window.from(),
                        to_block = window.to(),
                        span = sizer.get_span(),
                        attempt,
                        "request timed out; shrinking window"
                    );
                    continue;
                }
                self.telemetry.record_counted_error();
            } else {
                self.telemetry.record_failed_fetch();
            }

            let err = self.budget.charge(err)?;
            tracing::warn!(
                kind = %self.query.kind,
                from_block = window.from(),
                to_block = window.to(),
                span = sizer.get_span(),
                attempt,
                errors = self.budget.spent(),
                backoff_ms = backoff.current().as_millis() as u64,
                error = %err,
                "log fetch failed; retrying window"
            );
            backoff.wait(&self.cancellation).await?;
        }

        let path = self.store.write(chunk, &records).await?;
        self.telemetry.record_commit();
        tracing::debug!(
            tag = self.store.tag(),
            kind = %self.query.kind,
            from_block = chunk.from(),
            to_block = chunk.to(),
            records = records.len(),
            "chunk committed"
        );
        Ok(path)
    }
}
