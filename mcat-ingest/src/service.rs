//! Ingest service
//!
//! Owns the pipeline and worker pools and runs them for each trigger:
//! one-shot runs, scheduler cycles and watcher submissions. Runs from
//! different triggers are serialised by one run lock, so the pipeline is
//! never executing for two triggers at once. Emits
//! `RunStarted`/`RunCompleted` on the event bus around every run.

use anyhow::{Context, Result};
use chrono::Utc;
use mcat_common::config::TomlConfig;
use mcat_common::events::{EventBus, IngestEvent, RunTrigger};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{Cache, SqliteCache};
use crate::config::{retry_policy, tmdb_config};
use crate::engine::{Scheduler, Watcher, WatcherConfig, WorkerPool};
use crate::models::{RunSummary, WorkItem};
use crate::services::{ArtifactWriter, FileScanner, IngestPipeline, TmdbClient};
use crate::{build_router, AppState};

/// Settled files buffered between the watcher and the pool
const SUBMISSION_QUEUE_CAPACITY: usize = 256;

/// Upper bound on watcher submissions folded into one pool run
const MAX_WATCH_BATCH: usize = 64;

pub struct IngestService {
    config: TomlConfig,
    pipeline: IngestPipeline,
    event_bus: EventBus,
    pool: WorkerPool,
    /// Held for the whole of every run, whatever its trigger
    run_lock: Mutex<()>,
}

impl IngestService {
    pub fn new(config: TomlConfig, pipeline: IngestPipeline, event_bus: EventBus) -> Self {
        let workers = config.workers.count;
        Self {
            config,
            pipeline,
            event_bus,
            pool: WorkerPool::new(workers),
            run_lock: Mutex::new(()),
        }
    }

    /// Build the cache, provider client and pipeline described by `config`
    pub async fn from_config(config: TomlConfig, event_bus: EventBus) -> Result<Self> {
        let mut pipeline = IngestPipeline::new(ArtifactWriter::new(&config.library.output_dir));

        if config.cache.enabled {
            let cache = SqliteCache::open(&config.cache.path)
                .await
                .with_context(|| format!("Failed to open cache at {}", config.cache.path.display()))?;
            pipeline = pipeline.with_cache(Arc::new(cache), config.cache.ttl());
        } else {
            info!("Metadata cache disabled");
        }

        match tmdb_config(&config.provider) {
            Some(tmdb) => {
                let client = TmdbClient::new(tmdb).context("Failed to build metadata provider client")?;
                pipeline = pipeline.with_primary(Arc::new(client), retry_policy(&config.retry));
            }
            None => warn!("No provider API key configured, using sidecar metadata only"),
        }

        Ok(Self::new(config, pipeline, event_bus))
    }

    pub fn config(&self) -> &TomlConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn cache(&self) -> Option<Arc<dyn Cache>> {
        self.pipeline.cache().cloned()
    }

    /// Walk `roots` for media files off the async runtime
    pub async fn discover(&self, roots: &[PathBuf]) -> Vec<WorkItem> {
        let roots = roots.to_vec();
        match tokio::task::spawn_blocking(move || FileScanner::new().scan_roots(&roots)).await {
            Ok(report) => report.files.into_iter().map(WorkItem::new).collect(),
            Err(e) => {
                error!(error = %e, "Library scan task failed");
                Vec::new()
            }
        }
    }

    /// Run `items` through the pipeline with a fresh slug guard
    ///
    /// Waits for any run already in progress to finish first.
    pub async fn run_items(
        &self,
        trigger: RunTrigger,
        items: Vec<WorkItem>,
        cancel: &CancellationToken,
    ) -> RunSummary {
        let _run = match self.run_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(%trigger, "Another run is active, waiting for it to finish");
                self.run_lock.lock().await
            }
        };

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let pool = &self.pool;

        info!(%run_id, %trigger, items = items.len(), workers = pool.workers(), "Run started");
        self.event_bus.emit_lossy(IngestEvent::RunStarted {
            run_id,
            trigger,
            item_count: items.len(),
            timestamp: Utc::now(),
        });

        let processor = Arc::new(self.pipeline.for_new_run());
        let results = pool.run(items, processor, cancel).await;
        let summary = RunSummary::from_results(&results);
        let duration_ms = started.elapsed().as_millis() as u64;

        for result in results.iter().filter(|r| !r.is_success() && !r.is_cancelled()) {
            if let Some(e) = &result.error {
                warn!(file = %result.item.path().display(), error = %e, "Item failed");
            }
        }

        info!(%run_id, %trigger, duration_ms, "Run completed");
        summary.log();
        if let Some(cache) = self.pipeline.cache() {
            cache.stats().await.log();
        }

        self.event_bus.emit_lossy(IngestEvent::RunCompleted {
            run_id,
            trigger,
            counts: summary.to_counts(),
            duration_ms,
            timestamp: Utc::now(),
        });

        summary
    }

    /// Scan the configured roots and run every discovered item
    pub async fn run_once(&self, trigger: RunTrigger, cancel: &CancellationToken) -> RunSummary {
        let items = self.discover(&self.config.library.roots).await;
        self.run_items(trigger, items, cancel).await
    }

    /// Run the scheduler and/or watcher until `cancel` fires
    pub async fn run_daemon(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let config = self.config.clone();
        if !config.schedule.enabled && !config.watch.enabled {
            anyhow::bail!("Neither [schedule] nor [watch] is enabled, nothing to run");
        }
        if config.library.roots.is_empty() {
            anyhow::bail!("No library roots configured");
        }

        let scheduler = config.schedule.enabled.then(|| {
            Arc::new(Scheduler::new(
                config.schedule.interval(),
                config.schedule.run_on_startup,
            ))
        });

        let mut watcher = None;
        let mut consumer = None;
        if config.watch.enabled {
            let (tx, rx) = mpsc::channel(SUBMISSION_QUEUE_CAPACITY);
            let started = Watcher::start(
                WatcherConfig {
                    roots: config.library.roots.clone(),
                    debounce: config.watch.debounce(),
                    recursive: config.watch.recursive,
                },
                tx,
                &cancel,
            )
            .context("Failed to start filesystem watcher")?;
            watcher = Some(started);
            consumer = Some(tokio::spawn(
                Arc::clone(&self).consume_submissions(rx, cancel.clone()),
            ));
        }

        let state = AppState::new(self.event_bus.clone())
            .with_cache(self.cache())
            .with_scheduler(scheduler.clone())
            .with_watcher(watcher.as_ref().map(Watcher::stats));
        let listener_task = state.spawn_event_listener();

        let server = match &config.status.listen {
            Some(listen) => Some(spawn_status_server(listen, state, cancel.clone()).await?),
            None => None,
        };

        let scheduler_task = scheduler.map(|scheduler| {
            let svc = Arc::clone(&self);
            let cycle_cancel = cancel.clone();
            let bus = self.event_bus.clone();
            tokio::spawn(scheduler.run(
                cancel.clone(),
                move || {
                    let svc = Arc::clone(&svc);
                    let cancel = cycle_cancel.clone();
                    async move {
                        svc.run_once(RunTrigger::Scheduled, &cancel).await;
                        svc.purge_cache().await;
                    }
                },
                move || {
                    bus.emit_lossy(IngestEvent::CycleSkipped {
                        timestamp: Utc::now(),
                    })
                },
            ))
        });

        info!(
            schedule = config.schedule.enabled,
            watch = config.watch.enabled,
            roots = config.library.roots.len(),
            "Daemon running"
        );

        cancel.cancelled().await;
        info!("Daemon stopping");

        if let Some(watcher) = watcher {
            watcher.stop().await;
        }
        join_logged("scheduler", scheduler_task).await;
        join_logged("watch consumer", consumer).await;
        join_logged("status server", server).await;
        listener_task.abort();

        info!("Daemon stopped");
        Ok(())
    }

    async fn purge_cache(&self) {
        let Some(cache) = self.pipeline.cache() else {
            return;
        };
        match cache.purge_expired().await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Purged expired cache entries"),
            Err(e) => warn!(error = %e, "Cache purge failed"),
        }
    }

    /// Fold watcher submissions into pool runs, one batch at a time
    async fn consume_submissions(self: Arc<Self>, mut rx: mpsc::Receiver<WorkItem>, cancel: CancellationToken) {
        loop {
            let first = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            let mut batch = vec![first];
            while batch.len() < MAX_WATCH_BATCH {
                match rx.try_recv() {
                    Ok(item) => batch.push(item),
                    Err(_) => break,
                }
            }

            for item in &batch {
                self.event_bus.emit_lossy(IngestEvent::ItemSubmitted {
                    path: item.path().display().to_string(),
                    timestamp: Utc::now(),
                });
            }

            self.run_items(RunTrigger::Watch, batch, &cancel).await;
        }
    }
}

async fn spawn_status_server(
    listen: &str,
    state: AppState,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind status server to {}", listen))?;
    info!(addr = %listen, "Status server listening");

    let app = build_router(state);
    Ok(tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
            error!(error = %e, "Status server error");
        }
    }))
}

async fn join_logged(name: &str, handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        if let Err(e) = handle.await {
            error!(task = name, error = %e, "Background task failed");
        }
    }
}
