//! SQLite cache backend
//!
//! SQLite serializes writers, so every write (`set`, `clear`,
//! `purge_expired`) is funnelled through one dedicated writer task fed by a
//! bounded channel. Reads go straight to the pool and run concurrently with
//! the writer (WAL journal mode).
//!
//! Callers awaiting `set` wait for the writer's acknowledgement, so a
//! returned `Ok(())` means the row is durable.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use super::{duration_to_millis, is_fresh, Cache, CacheCounters, CacheError, CacheStats};

/// Queued writes before `set` callers start waiting for channel capacity
const WRITER_QUEUE_CAPACITY: usize = 256;

enum WriteCommand {
    Upsert {
        key: String,
        value: String,
        created_at_ms: i64,
        ttl_ms: i64,
        ack: oneshot::Sender<Result<(), sqlx::Error>>,
    },
    Clear {
        ack: oneshot::Sender<Result<(), sqlx::Error>>,
    },
    PurgeExpired {
        now_ms: i64,
        ack: oneshot::Sender<Result<u64, sqlx::Error>>,
    },
}

/// SQLite-file cache with a single writer task
pub struct SqliteCache {
    pool: SqlitePool,
    writer: mpsc::Sender<WriteCommand>,
    counters: Arc<CacheCounters>,
}

impl SqliteCache {
    /// Open (or create) the cache database and start its writer task
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        init_tables(&pool).await?;

        let (tx, rx) = mpsc::channel(WRITER_QUEUE_CAPACITY);
        tokio::spawn(writer_loop(pool.clone(), rx));

        tracing::info!(path = %db_path.display(), "Metadata cache opened");

        Ok(Self {
            pool,
            writer: tx,
            counters: Arc::new(CacheCounters::default()),
        })
    }

    async fn send_write<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, sqlx::Error>>) -> WriteCommand,
    ) -> Result<T, CacheError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.writer
            .send(build(ack_tx))
            .await
            .map_err(|_| CacheError::WriterClosed)?;
        let result = ack_rx.await.map_err(|_| CacheError::WriterClosed)?;
        Ok(result?)
    }
}

async fn init_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL,
            ttl_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Sole writer: applies commands in arrival order until every sender is dropped
async fn writer_loop(pool: SqlitePool, mut rx: mpsc::Receiver<WriteCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            WriteCommand::Upsert {
                key,
                value,
                created_at_ms,
                ttl_ms,
                ack,
            } => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO cache_entries (key, value, created_at_ms, ttl_ms)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        created_at_ms = excluded.created_at_ms,
                        ttl_ms = excluded.ttl_ms
                    "#,
                )
                .bind(&key)
                .bind(&value)
                .bind(created_at_ms)
                .bind(ttl_ms)
                .execute(&pool)
                .await
                .map(|_| ());
                let _ = ack.send(result);
            }
            WriteCommand::Clear { ack } => {
                let result = sqlx::query("DELETE FROM cache_entries")
                    .execute(&pool)
                    .await
                    .map(|_| ());
                let _ = ack.send(result);
            }
            WriteCommand::PurgeExpired { now_ms, ack } => {
                let result = sqlx::query(
                    "DELETE FROM cache_entries WHERE created_at_ms + ttl_ms <= ?",
                )
                .bind(now_ms)
                .execute(&pool)
                .await
                .map(|r| r.rows_affected());
                let _ = ack.send(result);
            }
        }
    }

    tracing::debug!("Cache writer stopped");
}

#[async_trait]
impl Cache for SqliteCache {
    async fn get(&self, key: &str) -> Option<String> {
        let row: Result<Option<(String, i64, i64)>, sqlx::Error> = sqlx::query_as(
            "SELECT value, created_at_ms, ttl_ms FROM cache_entries WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await;

        let now_ms = Utc::now().timestamp_millis();
        match row {
            Ok(Some((value, created_at_ms, ttl_ms))) if is_fresh(created_at_ms, ttl_ms, now_ms) => {
                self.counters.record_hit();
                Some(value)
            }
            Ok(_) => {
                self.counters.record_miss();
                None
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache read failed, treating as miss");
                self.counters.record_miss();
                None
            }
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let created_at_ms = Utc::now().timestamp_millis();
        let ttl_ms = duration_to_millis(ttl);
        let key_owned = key.to_string();

        let result = self
            .send_write(|ack| WriteCommand::Upsert {
                key: key_owned,
                value,
                created_at_ms,
                ttl_ms,
                ack,
            })
            .await;

        if result.is_err() {
            self.counters.record_write_failure();
        }
        result
    }

    async fn stats(&self) -> CacheStats {
        let now_ms = Utc::now().timestamp_millis();
        let live: Result<(i64,), sqlx::Error> = sqlx::query_as(
            "SELECT COUNT(*) FROM cache_entries WHERE created_at_ms + ttl_ms > ?",
        )
        .bind(now_ms)
        .fetch_one(&self.pool)
        .await;

        let entries = match live {
            Ok((count,)) => count.max(0) as u64,
            Err(e) => {
                tracing::warn!(error = %e, "Cache entry count failed");
                0
            }
        };
        self.counters.snapshot(entries)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.send_write(|ack| WriteCommand::Clear { ack }).await?;
        self.counters.reset();
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let now_ms = Utc::now().timestamp_millis();
        self.send_write(|ack| WriteCommand::PurgeExpired { now_ms, ack })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_then_get_hits() {
        let temp_dir = TempDir::new().unwrap();
        let cache = SqliteCache::open(&temp_dir.path().join("cache.db"))
            .await
            .unwrap();

        assert!(cache.get("meta:heat-1995").await.is_none());
        cache
            .set("meta:heat-1995", "{\"title\":\"Heat\"}".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            cache.get("meta:heat-1995").await.as_deref(),
            Some("{\"title\":\"Heat\"}")
        );

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.write_failures, 0);
    }

    #[tokio::test]
    async fn test_expired_row_is_a_miss_and_purgeable() {
        let temp_dir = TempDir::new().unwrap();
        let cache = SqliteCache::open(&temp_dir.path().join("cache.db"))
            .await
            .unwrap();

        cache
            .set("short", "v".to_string(), Duration::from_millis(50))
            .await
            .unwrap();
        cache
            .set("long", "v".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.get("short").await.is_none());
        assert!(cache.get("long").await.is_some());
        assert_eq!(cache.stats().await.entries, 1);
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.db");

        {
            let cache = SqliteCache::open(&path).await.unwrap();
            cache
                .set("meta:alien-1979", "payload".to_string(), Duration::from_secs(60))
                .await
                .unwrap();
        }

        let reopened = SqliteCache::open(&path).await.unwrap();
        assert_eq!(reopened.get("meta:alien-1979").await.as_deref(), Some("payload"));
    }

    #[tokio::test]
    async fn test_concurrent_writers_are_serialized() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Arc::new(
            SqliteCache::open(&temp_dir.path().join("cache.db"))
                .await
                .unwrap(),
        );

        let mut join_set = tokio::task::JoinSet::new();
        for i in 0..32 {
            let cache = Arc::clone(&cache);
            join_set.spawn(async move {
                cache
                    .set(&format!("key-{}", i), format!("value-{}", i), Duration::from_secs(60))
                    .await
            });
        }
        while let Some(result) = join_set.join_next().await {
            result.expect("Task panicked").unwrap();
        }

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 32);
        assert_eq!(stats.write_failures, 0);
        assert_eq!(cache.get("key-17").await.as_deref(), Some("value-17"));
    }

    #[tokio::test]
    async fn test_clear_removes_rows() {
        let temp_dir = TempDir::new().unwrap();
        let cache = SqliteCache::open(&temp_dir.path().join("cache.db"))
            .await
            .unwrap();
        cache.set("k", "v".to_string(), Duration::from_secs(60)).await.unwrap();

        cache.clear().await.unwrap();
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.stats().await.entries, 0);
    }
}
