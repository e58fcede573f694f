//! Engine status endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use mcat_common::events::{RunCounts, RunTrigger};
use serde::Serialize;
use uuid::Uuid;

use crate::cache::CacheStats;
use crate::engine::WatcherStats;
use crate::AppState;

/// The most recent completed run
#[derive(Debug, Clone, Serialize)]
pub struct LastRun {
    pub run_id: Uuid,
    pub trigger: RunTrigger,
    pub counts: RunCounts,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_secs: u64,
    pub skipped_ticks: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub last_run: Option<LastRun>,
    pub cache: Option<CacheStats>,
    pub scheduler: Option<SchedulerStatus>,
    pub watcher: Option<WatcherStats>,
}

/// GET /status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let last_run = state.last_run.read().await.clone();

    let cache = match &state.cache {
        Some(cache) => Some(cache.stats().await),
        None => None,
    };

    let scheduler = state.scheduler.as_ref().map(|s| SchedulerStatus {
        running: s.is_running(),
        interval_secs: s.interval().as_secs(),
        skipped_ticks: s.skipped_ticks(),
    });

    Json(StatusResponse {
        last_run,
        cache,
        scheduler,
        watcher: state.watcher.as_ref().map(|w| w.snapshot()),
    })
}

pub fn status_routes() -> Router<AppState> {
    Router::new().route("/status", get(get_status))
}
