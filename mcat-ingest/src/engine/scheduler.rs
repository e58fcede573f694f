//! Periodic scheduler with overlap prevention
//!
//! # State Progression
//! IDLE → RUNNING → IDLE
//!
//! IDLE → RUNNING is a single compare-and-swap on the run flag and succeeds
//! only when idle. RUNNING → IDLE happens unconditionally when the cycle's
//! guard is dropped, including when the cycle panics. A tick that finds the
//! flag set is dropped with a warning, never queued.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Held for the duration of one cycle; releases the run flag on drop
#[derive(Debug)]
pub struct CycleGuard {
    running: Arc<AtomicBool>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Fixed-interval driver for worker pool cycles
///
/// The run flag is owned by this instance, so independent schedulers never
/// interfere with each other.
#[derive(Debug)]
pub struct Scheduler {
    interval: Duration,
    run_on_startup: bool,
    running: Arc<AtomicBool>,
    skipped: AtomicU64,
}

impl Scheduler {
    pub fn new(interval: Duration, run_on_startup: bool) -> Self {
        Self {
            interval,
            run_on_startup,
            running: Arc::new(AtomicBool::new(false)),
            skipped: AtomicU64::new(0),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// A cycle is currently active
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ticks dropped because a cycle was still running
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Attempt IDLE → RUNNING; `None` if a cycle is already active
    pub fn try_begin(&self) -> Option<CycleGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard {
                running: Arc::clone(&self.running),
            })
    }

    fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            interval_secs = self.interval.as_secs(),
            "Previous cycle still running, skipping this tick; consider a longer schedule interval"
        );
    }

    /// Run one guarded cycle, or return `None` immediately if one is active
    pub async fn run_cycle<F, Fut, T>(&self, cycle: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(_guard) = self.try_begin() else {
            self.record_skip();
            return None;
        };
        Some(cycle().await)
    }

    /// Tick until `cancel` fires
    ///
    /// Each admitted cycle runs on its own task so later ticks can observe
    /// the overlap. `on_skip` is called for every dropped tick. On
    /// cancellation no new cycle is started; an in-flight cycle is awaited,
    /// not aborted.
    pub async fn run<F, Fut, S>(self: Arc<Self>, cancel: CancellationToken, cycle: F, on_skip: S)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        S: Fn() + Send + Sync,
    {
        let start = if self.run_on_startup {
            tokio::time::Instant::now()
        } else {
            tokio::time::Instant::now() + self.interval
        };
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: Option<JoinHandle<()>> = None;

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            run_on_startup = self.run_on_startup,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.try_begin() {
                        Some(guard) => {
                            let fut = cycle();
                            in_flight = Some(tokio::spawn(async move {
                                let _guard = guard;
                                fut.await;
                            }));
                        }
                        None => {
                            self.record_skip();
                            on_skip();
                        }
                    }
                }
            }
        }

        tracing::info!("Scheduler stopping, no further cycles will start");

        if let Some(handle) = in_flight {
            if !handle.is_finished() {
                tracing::info!("Waiting for in-flight cycle to finish");
            }
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Scheduled cycle task failed");
            }
        }
    }
}
