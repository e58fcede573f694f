//! Filesystem watcher with per-path debounce
//!
//! # Architecture
//! - `notify` delivers raw events on its own thread; the callback maps them to
//!   [`FsEvent`]s and pushes them into a bounded queue
//! - One dispatcher task drains the queue and owns the [`Debouncer`], so
//!   per-path state needs no further locking
//! - A quiesced media file is re-checked and submitted exactly once as a
//!   [`WorkItem`] on the submission channel
//!
//! Stopping cancels every pending timer, releases the OS watch and joins the
//! dispatcher; nothing is submitted after [`Watcher::stop`] returns.

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::debounce::Debouncer;
use crate::models::WorkItem;
use crate::services::file_scanner::is_media_path;

/// Raw events buffered between the notify thread and the dispatcher
const EVENT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Watch root not found: {0}")]
    RootNotFound(PathBuf),

    #[error("Filesystem watch failed: {0}")]
    Notify(#[from] notify::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    /// File created or moved into a watched directory
    Created,
    /// File contents changed
    Written,
    /// File removed or moved away
    Removed,
    /// Directory created or moved into a watched directory
    DirCreated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub path: PathBuf,
    pub kind: FsEventKind,
}

impl FsEvent {
    fn new(path: PathBuf, kind: FsEventKind) -> Self {
        Self { path, kind }
    }
}

/// Map one notify event to zero or more watcher events
///
/// A rename carrying both paths cancels the old path and creates the new one.
pub fn map_event(event: Event) -> Vec<FsEvent> {
    let Event { kind, paths, .. } = event;
    match kind {
        EventKind::Create(CreateKind::Folder) => paths
            .into_iter()
            .map(|p| FsEvent::new(p, FsEventKind::DirCreated))
            .collect(),
        EventKind::Create(_) => paths
            .into_iter()
            .map(|p| {
                let kind = if p.is_dir() {
                    FsEventKind::DirCreated
                } else {
                    FsEventKind::Created
                };
                FsEvent::new(p, kind)
            })
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = paths.into_iter();
            let mut out = Vec::with_capacity(2);
            if let Some(from) = paths.next() {
                out.push(FsEvent::new(from, FsEventKind::Removed));
            }
            if let Some(to) = paths.next() {
                out.push(arrival(to));
            }
            out
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => paths
            .into_iter()
            .map(|p| FsEvent::new(p, FsEventKind::Removed))
            .collect(),
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .into_iter()
            .map(|p| {
                if p.exists() {
                    arrival(p)
                } else {
                    FsEvent::new(p, FsEventKind::Removed)
                }
            })
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => paths
            .into_iter()
            .map(|p| FsEvent::new(p, FsEventKind::Written))
            .collect(),
        EventKind::Remove(_) => paths
            .into_iter()
            .map(|p| FsEvent::new(p, FsEventKind::Removed))
            .collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// A path that appeared via rename is a created file or directory
fn arrival(path: PathBuf) -> FsEvent {
    if path.is_dir() {
        FsEvent::new(path, FsEventKind::DirCreated)
    } else {
        FsEvent::new(path, FsEventKind::Created)
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub roots: Vec<PathBuf>,
    pub debounce: Duration,
    pub recursive: bool,
}

#[derive(Debug, Default)]
struct WatcherCounters {
    pending: AtomicUsize,
    submitted: AtomicU64,
}

/// Point-in-time watcher counters for the status endpoint
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct WatcherStats {
    pub pending: usize,
    pub submitted: u64,
}

/// Cloneable read handle on a running watcher's counters
#[derive(Debug, Clone)]
pub struct WatcherStatsHandle {
    counters: Arc<WatcherCounters>,
}

impl WatcherStatsHandle {
    pub fn snapshot(&self) -> WatcherStats {
        WatcherStats {
            pending: self.counters.pending.load(Ordering::Relaxed),
            submitted: self.counters.submitted.load(Ordering::Relaxed),
        }
    }
}

pub struct Watcher {
    cancel: CancellationToken,
    dispatcher: JoinHandle<()>,
    counters: Arc<WatcherCounters>,
}

impl Watcher {
    /// Start watching `config.roots` and submit quiesced media files to `submit`
    ///
    /// The watcher stops when `parent` is cancelled or on [`stop`](Self::stop).
    pub fn start(
        config: WatcherConfig,
        submit: mpsc::Sender<WorkItem>,
        parent: &CancellationToken,
    ) -> Result<Self, WatchError> {
        for root in &config.roots {
            if !root.is_dir() {
                return Err(WatchError::RootNotFound(root.clone()));
            }
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let mut fs_watcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for fs_event in map_event(event) {
                        // Runs on the notify thread, outside the runtime
                        if event_tx.blocking_send(fs_event).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Filesystem watch error"),
            })?;

        let mode = recursive_mode(config.recursive);
        for root in &config.roots {
            fs_watcher.watch(root, mode)?;
            tracing::info!(root = %root.display(), recursive = config.recursive, "Watching library root");
        }

        let cancel = parent.child_token();
        let counters = Arc::new(WatcherCounters::default());

        let dispatcher = Dispatcher {
            fs_watcher,
            debouncer: Debouncer::new(config.debounce),
            recursive: config.recursive,
            submit,
            counters: Arc::clone(&counters),
        };
        let dispatcher = tokio::spawn(dispatcher.run(event_rx, cancel.clone()));

        Ok(Self {
            cancel,
            dispatcher,
            counters,
        })
    }

    pub fn stats(&self) -> WatcherStatsHandle {
        WatcherStatsHandle {
            counters: Arc::clone(&self.counters),
        }
    }

    /// Cancel pending timers, release the event source and join the dispatcher
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.dispatcher.await {
            tracing::error!(error = %e, "Watcher dispatcher task failed");
        }
        tracing::info!("Watcher stopped");
    }
}

fn recursive_mode(recursive: bool) -> RecursiveMode {
    if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    }
}

/// Cancel the timer for a removed path, or every timer under a removed directory
///
/// A media file has no children, so only directories pay for the prefix scan.
fn cancel_removed(debouncer: &mut Debouncer, path: &Path) -> usize {
    if debouncer.cancel(path) {
        return 1;
    }
    if is_media_path(path) {
        return 0;
    }
    debouncer.cancel_under(path)
}

struct Dispatcher {
    fs_watcher: RecommendedWatcher,
    debouncer: Debouncer,
    recursive: bool,
    submit: mpsc::Sender<WorkItem>,
    counters: Arc<WatcherCounters>,
}

impl Dispatcher {
    async fn run(mut self, mut events: mpsc::Receiver<FsEvent>, cancel: CancellationToken) {
        tracing::debug!(debounce_ms = self.debouncer.delay().as_millis() as u64, "Watcher dispatcher started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                maybe_event = events.recv() => match maybe_event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                Some(path) = self.debouncer.next_ready(), if self.debouncer.has_pending() => {
                    if !self.fire(path).await {
                        break;
                    }
                }
            }
            self.counters
                .pending
                .store(self.debouncer.pending_count(), Ordering::Relaxed);
        }

        self.debouncer.cancel_all();
        self.counters.pending.store(0, Ordering::Relaxed);
        drop(self.fs_watcher);
        tracing::debug!("Watcher dispatcher stopped");
    }

    fn handle(&mut self, event: FsEvent) {
        match event.kind {
            FsEventKind::Created | FsEventKind::Written => {
                if is_media_path(&event.path) {
                    self.debouncer.schedule(event.path);
                }
            }
            FsEventKind::Removed => {
                let cancelled = cancel_removed(&mut self.debouncer, &event.path);
                if cancelled > 0 {
                    tracing::debug!(path = %event.path.display(), cancelled, "Path removed, pending timers cancelled");
                }
            }
            FsEventKind::DirCreated => {
                if self.recursive {
                    self.add_directory(&event.path);
                }
            }
        }
    }

    /// Extend the watch set with a new directory and pick up files already in it
    fn add_directory(&mut self, dir: &Path) {
        if let Err(e) = self.fs_watcher.watch(dir, RecursiveMode::Recursive) {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to watch new directory");
            return;
        }
        tracing::debug!(dir = %dir.display(), "Watching new directory");

        for entry in WalkDir::new(dir).follow_links(false).into_iter().flatten() {
            if entry.file_type().is_file() && is_media_path(entry.path()) {
                self.debouncer.schedule(entry.path().to_path_buf());
            }
        }
    }

    /// Returns false once the submission channel is closed
    async fn fire(&mut self, path: PathBuf) -> bool {
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => {
                tracing::debug!(file = %path.display(), "Debounced path no longer a file, skipping");
                return true;
            }
        }

        tracing::info!(file = %path.display(), "File settled, submitting for ingest");
        if self.submit.send(WorkItem::new(path)).await.is_err() {
            tracing::warn!("Submission channel closed, stopping watcher");
            return false;
        }
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        true
    }
}
