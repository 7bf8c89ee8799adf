use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(10);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Harvest counters shared by the driver and its workers.
#[derive(Default, Debug)]
pub struct Telemetry {
    chunks_planned: AtomicU64,
    chunks_committed: AtomicU64,
    chunks_skipped: AtomicU64,
    fetch_calls: AtomicU64,
    events: AtomicU64,
    timeouts: AtomicU64,
    span_shrinks: AtomicU64,
    counted_errors: AtomicU64,
}

impl Telemetry {
    pub fn record_plan(&self, pending: usize, covered: usize) {
        self.chunks_planned
            .fetch_add(pending as u64, Ordering::Relaxed);
        self.chunks_skipped
            .fetch_add(covered as u64, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.chunks_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch(&self, events: usize) {
        self.fetch_calls.fetch_add(1, Ordering::Relaxed);
        self.events.fetch_add(events as u64, Ordering::Relaxed);
    }

    /// A timed-out request; `shrunk` tells whether the window could shrink.
    pub fn record_timeout(&self, shrunk: bool) {
        self.fetch_calls.fetch_add(1, Ordering::Relaxed);
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        if shrunk {
            self.span_shrinks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_counted_error(&self) {
        self.counted_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Counted failure of a call that is not a timeout.
    pub fn record_failed_fetch(&self) {
        self.fetch_calls.fetch_add(1, Ordering::Relaxed);
        self.record_counted_error();
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            chunks_planned: self.chunks_planned.load(Ordering::Relaxed),
            chunks_committed: self.chunks_committed.load(Ordering::Relaxed),
            chunks_skipped: self.chunks_skipped.load(Ordering::Relaxed),
            fetch_calls: self.fetch_calls.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            span_shrinks: self.span_shrinks.load(Ordering::Relaxed),
            counted_errors: self.counted_errors.load(Ordering::Relaxed),
        }
    }

    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::Relaxed)
    }

    pub fn chunks_committed(&self) -> u64 {
        self.chunks_committed.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub chunks_planned: u64,
    pub chunks_committed: u64,
    pub chunks_skipped: u64,
    pub fetch_calls: u64,
    pub events: u64,
    pub timeouts: u64,
    pub span_shrinks: u64,
    pub counted_errors: u64,
}

/// Spawns a background task that periodically logs harvest progress.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "airdrop::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let events_delta = current.events.saturating_sub(last_snapshot.events);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        events_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "airdrop::metrics",
                        events_per_sec = format!("{throughput:.2}"),
                        committed = current.chunks_committed,
                        planned = current.chunks_planned,
                        skipped = current.chunks_skipped,
                        fetch_calls = current.fetch_calls,
                        events = current.events,
                        timeouts = current.timeouts,
                        span_shrinks = current.span_shrinks,
                        counted_errors = current.counted_errors,
                        "harvest metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
