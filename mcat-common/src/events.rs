//! Event types and broadcast bus
//!
//! Events are emitted by the ingestion engine as runs start and finish,
//! as scheduler ticks are dropped, and as the watcher submits files.
//! Consumers (the status API, log forwarders) subscribe independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use uuid::Uuid;

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// One-shot run from the command line
    Manual,
    /// Scheduler tick
    Scheduled,
    /// Debounced filesystem event
    Watch,
}

impl std::fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunTrigger::Manual => "manual",
            RunTrigger::Scheduled => "scheduled",
            RunTrigger::Watch => "watch",
        };
        f.write_str(s)
    }
}

/// Run-level counts carried by [`IngestEvent::RunCompleted`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub total: usize,
    pub succeeded: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Items per enrichment source tag ("cache", "primary", "fallback", "merged")
    pub by_source: BTreeMap<String, usize>,
}

/// mcat event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IngestEvent {
    /// A worker pool run started
    RunStarted {
        run_id: Uuid,
        trigger: RunTrigger,
        item_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A worker pool run returned; every item has a result
    RunCompleted {
        run_id: Uuid,
        trigger: RunTrigger,
        counts: RunCounts,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A scheduler tick arrived while the previous cycle was still running
    CycleSkipped { timestamp: DateTime<Utc> },

    /// The watcher submitted a quiesced file for processing
    ItemSubmitted {
        path: String,
        timestamp: DateTime<Utc>,
    },
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally: publishing never blocks, slow
/// subscribers observe `Lagged` instead of stalling producers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IngestEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: IngestEvent,
    ) -> Result<usize, broadcast::error::SendError<IngestEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: IngestEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
