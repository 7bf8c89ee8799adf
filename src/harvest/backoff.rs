use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Exponential delay between retries of a failed request window.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    current: Duration,
}

impl RetryBackoff {
    pub(crate) fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            current: initial_delay,
        }
    }

    pub(crate) fn current(&self) -> Duration {
        self.current
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.initial_delay;
    }

    /// Sleeps for the current delay (or until cancelled) and doubles it.
    pub(crate) async fn wait(&mut self, cancellation: &CancellationToken) -> Result<()> {
        sleep_with_cancellation(self.current, cancellation).await?;
        self.current = next_backoff(self.current, self.max_delay);
        Ok(())
    }
}

async fn sleep_with_cancellation(delay: Duration, cancellation: &CancellationToken) -> Result<()> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    tokio::select! {
        _ = cancellation.cancelled() => Err(anyhow!("retry cancelled")),
        _ = sleep(delay) => Ok(()),
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}
