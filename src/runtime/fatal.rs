use anyhow::Error as AnyError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// First-error-wins abort switch shared by the workers of one harvest call.
///
/// The first trigger keeps its error and cancels the run token; later
/// triggers (workers failing on the cancellation itself) are dropped.
#[derive(Clone)]
pub struct FatalErrorHandler {
    inner: Arc<FatalInner>,
}

struct FatalInner {
    triggered: AtomicBool,
    run_shutdown: CancellationToken,
    captured_error: Mutex<Option<AnyError>>,
}

impl FatalErrorHandler {
    pub fn new(run_shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(FatalInner {
                triggered: AtomicBool::new(false),
                run_shutdown,
                captured_error: Mutex::new(None),
            }),
        }
    }

    pub fn trigger(&self, context: &str, error: AnyError) {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            tracing::debug!(context, error = %error, "harvest already aborting; dropping error");
            return;
        }

        tracing::error!(
            context,
            error = %error,
            "fatal harvest error; stopping workers"
        );

        {
            let mut slot = self
                .inner
                .captured_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(error);
            }
        }

        self.inner.run_shutdown.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Takes the captured error, leaving the handler triggered.
    pub fn take_error(&self) -> Option<AnyError> {
        self.inner
            .captured_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
