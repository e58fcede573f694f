//! mcat-ingest library interface
//!
//! Concurrent media ingestion: a bounded worker pool drives the per-item
//! pipeline over files found by directory scans (one-shot or scheduled) and
//! by a debounced filesystem watcher.

pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod service;
pub mod services;
pub mod utils;

pub use crate::error::IngestError;
pub use crate::service::IngestService;

use axum::Router;
use chrono::{DateTime, Utc};
use mcat_common::events::{EventBus, IngestEvent};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::api::LastRun;
use crate::cache::Cache;
use crate::engine::{Scheduler, WatcherStatsHandle};

/// Application state shared across status handlers
#[derive(Clone)]
pub struct AppState {
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Most recent `RunCompleted`, kept current by the event listener
    pub last_run: Arc<RwLock<Option<LastRun>>>,
    /// Last run-level failure, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
    pub cache: Option<Arc<dyn Cache>>,
    pub scheduler: Option<Arc<Scheduler>>,
    pub watcher: Option<WatcherStatsHandle>,
}

impl AppState {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            event_bus,
            startup_time: Utc::now(),
            last_run: Arc::new(RwLock::new(None)),
            last_error: Arc::new(RwLock::new(None)),
            cache: None,
            scheduler: None,
            watcher: None,
        }
    }

    pub fn with_cache(mut self, cache: Option<Arc<dyn Cache>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Option<Arc<Scheduler>>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_watcher(mut self, watcher: Option<WatcherStatsHandle>) -> Self {
        self.watcher = watcher;
        self
    }

    /// Record a completed run; other events are ignored
    pub async fn observe(&self, event: IngestEvent) {
        if let IngestEvent::RunCompleted {
            run_id,
            trigger,
            counts,
            duration_ms,
            timestamp,
        } = event
        {
            if counts.failed > 0 {
                *self.last_error.write().await = Some(format!(
                    "{} of {} items failed in {} run {}",
                    counts.failed, counts.total, trigger, run_id
                ));
            }
            *self.last_run.write().await = Some(LastRun {
                run_id,
                trigger,
                counts,
                duration_ms,
                finished_at: timestamp,
            });
        }
    }

    /// Subscribe to the event bus and keep `last_run` current
    pub fn spawn_event_listener(&self) -> JoinHandle<()> {
        let mut rx = self.event_bus.subscribe();
        let state = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => state.observe(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Status listener lagged behind event bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Build the status router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::status_routes())
        .with_state(state)
}
