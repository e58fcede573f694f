//! Concurrency engine: pool, admission control, scheduling and watching

pub mod debounce;
pub mod scheduler;
pub mod slug_guard;
pub mod watcher;
pub mod worker_pool;

pub use debounce::Debouncer;
pub use scheduler::{CycleGuard, Scheduler};
pub use slug_guard::SlugGuard;
pub use watcher::{FsEvent, FsEventKind, WatchError, Watcher, WatcherConfig, WatcherStats, WatcherStatsHandle};
pub use worker_pool::{processor_fn, FnProcessor, ItemProcessor, ProgressHandle, WorkerPool};
