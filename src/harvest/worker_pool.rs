//! Bounded pool that drains the pending chunks of one harvest call.
//!
//! Workers pull chunks from a shared queue until it is empty or the run is
//! cancelled. The first failure (error or panic) is captured by the
//! [`FatalErrorHandler`], which cancels the remaining workers.

use super::fetcher::ChunkFetcher;
use crate::checkpoint::BlockRange;
use crate::runtime::fatal::FatalErrorHandler;
use anyhow::anyhow;
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct ChunkQueue {
    inner: Arc<Mutex<VecDeque<BlockRange>>>,
}

impl ChunkQueue {
    fn new(chunks: Vec<BlockRange>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(chunks.into())),
        }
    }

    fn next(&self) -> Option<BlockRange> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

pub(crate) struct WorkerPool {
    workers: usize,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            handles: Vec::new(),
        }
    }

    pub(crate) fn workers(&self) -> usize {
        self.workers
    }

    /// Spawns the workers over `chunks`.
    pub(crate) fn launch(
        &mut self,
        fetcher: Arc<ChunkFetcher>,
        chunks: Vec<BlockRange>,
        run_token: CancellationToken,
        fatal_handler: FatalErrorHandler,
    ) {
        let queue = ChunkQueue::new(chunks);

        for worker_id in 0..self.workers {
            let fetcher = fetcher.clone();
            let queue = queue.clone();
            let run_token = run_token.clone();
            let fatal_handler = fatal_handler.clone();

            let handle = tokio::spawn(async move {
                let result = std::panic::AssertUnwindSafe(run_worker(
                    worker_id,
                    fetcher,
                    queue,
                    run_token.clone(),
                ))
                .catch_unwind()
                .await;

                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        let context = format!("worker {worker_id} exited with error");
                        fatal_handler.trigger(context.as_str(), err);
                    }
                    Err(panic_payload) => {
                        let panic_msg = panic_message(panic_payload.as_ref());
                        tracing::error!(
                            worker = worker_id,
                            panic = %panic_msg,
                            "worker task panicked"
                        );
                        let context = format!("worker {worker_id} panicked");
                        fatal_handler.trigger(
                            context.as_str(),
                            anyhow!("worker {worker_id} panicked: {panic_msg}"),
                        );
                    }
                }
            });

            self.handles.push(handle);
        }
    }

    /// Barrier: waits for every worker to finish.
    pub(crate) async fn join(&mut self, fatal_handler: &FatalErrorHandler) {
        let handles = std::mem::take(&mut self.handles);
        for (worker_id, result) in join_all(handles).await.into_iter().enumerate() {
            if let Err(err) = result {
                fatal_handler.trigger(
                    "worker join",
                    anyhow!("worker {worker_id} could not be joined: {err}"),
                );
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    fetcher: Arc<ChunkFetcher>,
    queue: ChunkQueue,
    run_token: CancellationToken,
) -> anyhow::Result<()> {
    while let Some(chunk) = queue.next() {
        if run_token.is_cancelled() {
            tracing::debug!(worker = worker_id, "run cancelled; worker stopping");
            return Ok(());
        }
        tracing::debug!(
            worker = worker_id,
            from_block = chunk.from(),
            to_block = chunk.to(),
            "fetching chunk"
        );
        fetcher.fetch_chunk(chunk).await?;
    }
    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
