use crate::checkpoint::DEFAULT_STEP_SIZE;
use crate::harvest::sizer::MIN_REQUEST_SPAN;
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_REQUEST_SPAN: u64 = 5_000;
pub const DEFAULT_MAX_FETCH_ERRORS: usize = 5;
pub const DEFAULT_WORKER_RESERVE: usize = 1;
pub const DEFAULT_MIN_HOLDER_AMOUNT: f64 = 1.0;
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_INITIAL_BACKOFF_MS: u64 = 200;
const DEFAULT_RETRY_MAX_BACKOFF_MS: u64 = 5_000;
const DEFAULT_CHECKPOINT_DIR: &str = "checkpoints";
const DEFAULT_OUTPUT_DIR: &str = "output";

/// Runtime configuration for a snapshot run.
///
/// All instances must be constructed via [`HarvestConfig::builder`] or [`HarvestConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestConfig {
    rpc_url: String,
    start_block: u64,
    target_block: Option<u64>,
    step_size: u64,
    request_span: u64,
    max_fetch_errors: usize,
    worker_reserve: usize,
    thread_count: Option<usize>,
    rpc_timeout: Duration,
    retry_initial_backoff: Duration,
    retry_max_backoff: Duration,
    checkpoint_dir: PathBuf,
    output_dir: PathBuf,
    min_holder_amount: f64,
    metrics_interval: Duration,
}

pub struct HarvestConfigParams {
    pub rpc_url: String,
    pub start_block: u64,
    pub target_block: Option<u64>,
    pub step_size: u64,
    pub request_span: u64,
    pub max_fetch_errors: usize,
    pub worker_reserve: usize,
    pub thread_count: Option<usize>,
    pub rpc_timeout: Duration,
    pub retry_initial_backoff: Duration,
    pub retry_max_backoff: Duration,
    pub checkpoint_dir: PathBuf,
    pub output_dir: PathBuf,
    pub min_holder_amount: f64,
    pub metrics_interval: Duration,
}

impl HarvestConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> HarvestConfigBuilder {
        HarvestConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: HarvestConfigParams) -> Result<Self> {
        let HarvestConfigParams {
            rpc_url,
            start_block,
            target_block,
            step_size,
            request_span,
            max_fetch_errors,
            worker_reserve,
            thread_count,
            rpc_timeout,
            retry_initial_backoff,
            retry_max_backoff,
            checkpoint_dir,
            output_dir,
            min_holder_amount,
            metrics_interval,
        } = params;

        let config = Self {
            rpc_url: rpc_url.trim().to_owned(),
            start_block,
            target_block,
            step_size,
            request_span,
            max_fetch_errors,
            worker_reserve,
            thread_count,
            rpc_timeout,
            retry_initial_backoff,
            retry_max_backoff,
            checkpoint_dir,
            output_dir,
            min_holder_amount,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    /// Last block of the snapshot; `None` means "the node's latest block".
    pub fn target_block(&self) -> Option<u64> {
        self.target_block
    }

    /// Blocks per checkpoint chunk.
    pub fn step_size(&self) -> u64 {
        self.step_size
    }

    /// Initial request window within a chunk.
    pub fn request_span(&self) -> u64 {
        self.request_span
    }

    /// Counted fetch failures tolerated per harvest call.
    pub fn max_fetch_errors(&self) -> usize {
        self.max_fetch_errors
    }

    pub fn worker_reserve(&self) -> usize {
        self.worker_reserve
    }

    pub fn thread_count(&self) -> Option<usize> {
        self.thread_count
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    pub fn retry_initial_backoff(&self) -> Duration {
        self.retry_initial_backoff
    }

    pub fn retry_max_backoff(&self) -> Duration {
        self.retry_max_backoff
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Holders below this many whole tokens are left out of the holders pool.
    pub fn min_holder_amount(&self) -> f64 {
        self.min_holder_amount
    }

    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Upper bound on concurrent chunk workers.
    ///
    /// An explicit `thread_count` wins; otherwise the available parallelism
    /// minus the reserve, never below one.
    pub fn max_workers(&self) -> usize {
        match self.thread_count {
            Some(count) => count.max(1),
            None => {
                let available = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                available.saturating_sub(self.worker_reserve).max(1)
            }
        }
    }

    /// Workers to spawn for `pending` chunks.
    pub fn pool_size(&self, pending: usize) -> usize {
        pending.min(self.max_workers()).max(1)
    }

    /// Pins the target block once it has been resolved from the node.
    pub fn with_target_block(&self, target_block: u64) -> Result<Self> {
        let config = Self {
            target_block: Some(target_block),
            ..self.clone()
        };
        config.validate()?;
        Ok(config)
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.rpc_url)?;

        if let Some(target) = self.target_block {
            if target <= self.start_block {
                bail!(
                    "target_block ({target}) must be greater than start_block ({})",
                    self.start_block
                );
            }
        }

        if self.step_size == 0 {
            bail!("step_size must be greater than 0");
        }

        if self.request_span < MIN_REQUEST_SPAN {
            bail!("request_span must be at least {MIN_REQUEST_SPAN}");
        }

        if self.max_fetch_errors == 0 {
            bail!("max_fetch_errors must be greater than 0");
        }

        if self.thread_count == Some(0) {
            bail!("thread_count must be greater than 0");
        }

        if self.rpc_timeout.is_zero() {
            bail!("rpc_timeout must be greater than 0");
        }

        if self.retry_initial_backoff.is_zero() {
            bail!("retry_initial_backoff must be greater than 0");
        }

        if self.retry_max_backoff < self.retry_initial_backoff {
            bail!("retry_max_backoff must not be below retry_initial_backoff");
        }

        ensure_path(&self.checkpoint_dir, "checkpoint_dir")?;
        ensure_path(&self.output_dir, "output_dir")?;

        if !self.min_holder_amount.is_finite() || self.min_holder_amount < 0.0 {
            bail!("min_holder_amount must be a finite, non-negative number");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct HarvestConfigBuilder {
    rpc_url: Option<String>,
    start_block: Option<u64>,
    target_block: Option<u64>,
    step_size: Option<u64>,
    request_span: Option<u64>,
    max_fetch_errors: Option<usize>,
    worker_reserve: Option<usize>,
    thread_count: Option<usize>,
    rpc_timeout: Option<Duration>,
    retry_initial_backoff: Option<Duration>,
    retry_max_backoff: Option<Duration>,
    checkpoint_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    min_holder_amount: Option<f64>,
    metrics_interval: Option<Duration>,
}

impl HarvestConfigBuilder {
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = Some(url.into());
        self
    }

    pub fn start_block(mut self, block: u64) -> Self {
        self.start_block = Some(block);
        self
    }

    pub fn target_block(mut self, block: u64) -> Self {
        self.target_block = Some(block);
        self
    }

    pub fn step_size(mut self, blocks: u64) -> Self {
        self.step_size = Some(blocks);
        self
    }

    pub fn request_span(mut self, blocks: u64) -> Self {
        self.request_span = Some(blocks);
        self
    }

    pub fn max_fetch_errors(mut self, errors: usize) -> Self {
        self.max_fetch_errors = Some(errors);
        self
    }

    pub fn worker_reserve(mut self, reserve: usize) -> Self {
        self.worker_reserve = Some(reserve);
        self
    }

    pub fn thread_count(mut self, count: usize) -> Self {
        self.thread_count = Some(count);
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    pub fn retry_initial_backoff(mut self, backoff: Duration) -> Self {
        self.retry_initial_backoff = Some(backoff);
        self
    }

    pub fn retry_max_backoff(mut self, backoff: Duration) -> Self {
        self.retry_max_backoff = Some(backoff);
        self
    }

    pub fn checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn min_holder_amount(mut self, amount: f64) -> Self {
        self.min_holder_amount = Some(amount);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<HarvestConfig> {
        let params = HarvestConfigParams {
            rpc_url: self.rpc_url.context("rpc_url is required")?,
            start_block: self.start_block.context("start_block is required")?,
            target_block: self.target_block,
            step_size: self.step_size.unwrap_or(DEFAULT_STEP_SIZE),
            request_span: self.request_span.unwrap_or(DEFAULT_REQUEST_SPAN),
            max_fetch_errors: self.max_fetch_errors.unwrap_or(DEFAULT_MAX_FETCH_ERRORS),
            worker_reserve: self.worker_reserve.unwrap_or(DEFAULT_WORKER_RESERVE),
            thread_count: self.thread_count,
            rpc_timeout: self
                .rpc_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS)),
            retry_initial_backoff: self
                .retry_initial_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_RETRY_INITIAL_BACKOFF_MS)),
            retry_max_backoff: self
                .retry_max_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_RETRY_MAX_BACKOFF_MS)),
            checkpoint_dir: self
                .checkpoint_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT_DIR)),
            output_dir: self
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            min_holder_amount: self.min_holder_amount.unwrap_or(DEFAULT_MIN_HOLDER_AMOUNT),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
        };

        HarvestConfig::new(params)
    }
}

fn ensure_path(path: &Path, field: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("rpc_url must start with http:// or https://");
    }
    Ok(())
}
