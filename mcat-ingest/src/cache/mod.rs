//! Time-to-live read-through cache in front of the metadata provider
//!
//! An entry is present only while `now - created_at < ttl`. Expiry is lazy:
//! `get` reports an expired entry as a miss whether or not the store has
//! physically removed it. `purge_expired` is an optional sweep.
//!
//! Two backends:
//! - [`MemoryCache`]: process-local map, used when no cache path is wanted and in tests
//! - [`SqliteCache`]: embedded SQLite file; concurrent reads, one writer task

pub mod memory;
pub mod sqlite;

pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Cache backend errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The writer task has stopped; no further writes are possible
    #[error("Cache writer is not running")]
    WriterClosed,

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Live (non-expired) entries
    pub entries: u64,
    /// `set` calls that failed; the pipeline continued without caching
    pub write_failures: u64,
}

impl CacheStats {
    pub fn log(&self) {
        tracing::info!(
            hits = self.hits,
            misses = self.misses,
            entries = self.entries,
            write_failures = self.write_failures,
            "Cache statistics"
        );
    }
}

/// Key/value store with per-entry time-to-live
///
/// Implementations must be safe under concurrent `get`/`set` from every
/// pool worker. `set` may block behind a serialized writer.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch a live entry; increments the hit or miss counter
    async fn get(&self, key: &str) -> Option<String>;

    /// Insert or overwrite an entry; a failure leaves any previous entry untouched
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn stats(&self) -> CacheStats;

    /// Remove every entry and reset the counters
    async fn clear(&self) -> Result<(), CacheError>;

    /// Physically remove expired entries, returning how many were removed
    async fn purge_expired(&self) -> Result<u64, CacheError>;
}

/// One stored value with its creation time and lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: String, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            created_at: Utc::now(),
            ttl,
        }
    }

    /// Entry is live at `now` iff `now - created_at < ttl`
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        is_fresh(
            self.created_at.timestamp_millis(),
            duration_to_millis(self.ttl),
            now.timestamp_millis(),
        )
    }
}

/// Freshness rule shared by both backends, in epoch milliseconds
pub(crate) fn is_fresh(created_at_ms: i64, ttl_ms: i64, now_ms: i64) -> bool {
    now_ms.saturating_sub(created_at_ms) < ttl_ms
}

pub(crate) fn duration_to_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Hit/miss/failure counters shared by backends
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    write_failures: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entries: u64) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.write_failures.store(0, Ordering::Relaxed);
    }
}
