//! In-process cache backend

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{Cache, CacheCounters, CacheEntry, CacheError, CacheStats};

/// Map-backed cache; readers proceed concurrently under the read lock
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    counters: CacheCounters,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pre-built entry, bypassing the clock (used to seed state)
    pub async fn insert_entry(&self, entry: CacheEntry) {
        self.entries.write().await.insert(entry.key.clone(), entry);
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let now = Utc::now();
        let value = self
            .entries
            .read()
            .await
            .get(key)
            .filter(|entry| entry.is_fresh_at(now))
            .map(|entry| entry.value.clone());

        match value {
            Some(v) => {
                self.counters.record_hit();
                Some(v)
            }
            None => {
                self.counters.record_miss();
                None
            }
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry::new(key, value, ttl);
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let live = self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| entry.is_fresh_at(now))
            .count() as u64;
        self.counters.snapshot(live)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.write().await.clear();
        self.counters.reset();
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh_at(now));
        Ok((before - entries.len()) as u64)
    }
}
