//! Bounded-concurrency worker pool
//!
//! Runs up to `workers` items at once through an [`ItemProcessor`] and
//! returns exactly one [`ProcessResult`] per item, in no particular order.
//!
//! # Architecture
//! - Bounded stream via `futures::stream::buffer_unordered(workers)`
//! - Each admitted item is spawned onto the runtime, so executors run in parallel
//! - The cancellation token is checked when an item is admitted; items not yet
//!   started are reported as cancelled without calling the processor, items
//!   already started run to completion
//! - A panicking processor yields an error result for that item only

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::IngestError;
use crate::models::{ProcessOutcome, ProcessResult, WorkItem};

/// Per-item processing function driven by the pool, the scheduler and the watcher
#[async_trait]
pub trait ItemProcessor: Send + Sync + 'static {
    async fn process(&self, cancel: &CancellationToken, item: &WorkItem) -> ProcessOutcome;
}

/// Adapter turning an async closure into an [`ItemProcessor`]
pub struct FnProcessor<F>(F);

/// Wrap `f` as an item processor
pub fn processor_fn<F, Fut>(f: F) -> FnProcessor<F>
where
    F: Fn(CancellationToken, WorkItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcessOutcome> + Send + 'static,
{
    FnProcessor(f)
}

#[async_trait]
impl<F, Fut> ItemProcessor for FnProcessor<F>
where
    F: Fn(CancellationToken, WorkItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcessOutcome> + Send + 'static,
{
    async fn process(&self, cancel: &CancellationToken, item: &WorkItem) -> ProcessOutcome {
        (self.0)(cancel.clone(), item.clone()).await
    }
}

/// Read-only view of a pool's processed-item counter
///
/// Safe to poll from a progress reporter while a run is in flight.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    processed: Arc<AtomicUsize>,
}

impl ProgressHandle {
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Acquire)
    }
}

/// Worker pool service
pub struct WorkerPool {
    workers: usize,
    processed: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Create a pool with `workers` executors (0 is clamped to 1)
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            processed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn progress(&self) -> ProgressHandle {
        ProgressHandle {
            processed: Arc::clone(&self.processed),
        }
    }

    /// Process every item and return one result per item
    ///
    /// The counter is reset at the start of each call and incremented once
    /// per completed item (success, failure or cancellation).
    pub async fn run<P>(
        &self,
        items: Vec<WorkItem>,
        processor: Arc<P>,
        cancel: &CancellationToken,
    ) -> Vec<ProcessResult>
    where
        P: ItemProcessor + ?Sized,
    {
        self.processed.store(0, Ordering::Release);
        let total = items.len();

        tracing::debug!(items = total, workers = self.workers, "Worker pool starting");

        let results: Vec<ProcessResult> = stream::iter(items)
            .map(|item| {
                let processor = Arc::clone(&processor);
                let cancel = cancel.clone();
                let processed = Arc::clone(&self.processed);

                async move {
                    let result = if cancel.is_cancelled() {
                        ProcessResult::cancelled(item)
                    } else {
                        run_one(processor, cancel, item).await
                    };

                    let current = processed.fetch_add(1, Ordering::AcqRel) + 1;
                    if current % 10 == 0 || current == total {
                        tracing::info!(
                            progress = format!("{}/{}", current, total),
                            "Worker pool progress"
                        );
                    }

                    result
                }
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        results
    }
}

/// Run one item on its own task so a panic stays contained
async fn run_one<P>(processor: Arc<P>, cancel: CancellationToken, item: WorkItem) -> ProcessResult
where
    P: ItemProcessor + ?Sized,
{
    let fallback_item = item.clone();

    let handle = tokio::spawn(async move {
        let outcome = processor.process(&cancel, &item).await;
        ProcessResult::from_outcome(item, outcome)
    });

    match handle.await {
        Ok(result) => result,
        Err(join_error) => {
            let message = if join_error.is_panic() {
                let payload = join_error.into_panic();
                payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string())
            } else {
                "task aborted".to_string()
            };

            tracing::error!(
                file = %fallback_item.path().display(),
                error = %message,
                "Item processing task failed"
            );

            ProcessResult::from_outcome(
                fallback_item,
                ProcessOutcome::failed(IngestError::Panicked(message)),
            )
        }
    }
}

/// Run `items` through `processor` with a one-off pool of `workers` executors
pub async fn run<P>(
    items: Vec<WorkItem>,
    workers: usize,
    processor: Arc<P>,
    cancel: &CancellationToken,
) -> Vec<ProcessResult>
where
    P: ItemProcessor + ?Sized,
{
    WorkerPool::new(workers).run(items, processor, cancel).await
}
