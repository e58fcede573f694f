//! Shared fixtures for mcat-ingest integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use mcat_ingest::cache::{Cache, CacheError, CacheStats};
use mcat_ingest::models::{MediaMetadata, WorkItem};
use mcat_ingest::services::{FetchError, MetadataSource, TitleQuery};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// How the mock provider answers
#[derive(Debug, Clone, Copy)]
pub enum MockMode {
    /// Every title is found
    Found,
    /// Every title is a permanent not-found
    NotFound,
    /// The first `n` calls fail transiently, later calls succeed
    TransientFor(usize),
}

/// Metadata provider double with a call counter
pub struct MockSource {
    mode: MockMode,
    calls: AtomicUsize,
    delay: Duration,
}

impl MockSource {
    pub fn new(mode: MockMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn lookup(&self, query: &TitleQuery) -> Result<MediaMetadata, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.mode {
            MockMode::NotFound => Err(FetchError::NotFound(query.slug())),
            MockMode::TransientFor(n) if call < n => Err(FetchError::Server(503, "unavailable".to_string())),
            MockMode::Found | MockMode::TransientFor(_) => Ok(MediaMetadata {
                title: query.title.clone(),
                year: query.year,
                overview: None,
                genres: vec!["Drama".to_string()],
                runtime_minutes: Some(120),
                rating: Some(7.5),
                provider_id: Some(format!("mock-{}", query.slug())),
            }),
        }
    }
}

/// Cache whose writes always fail; reads always miss
#[derive(Default)]
pub struct BrokenCache {
    misses: AtomicU64,
    write_failures: AtomicU64,
}

#[async_trait]
impl Cache for BrokenCache {
    async fn get(&self, _key: &str) -> Option<String> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
        Err(CacheError::WriterClosed)
    }

    async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: 0,
            misses: self.misses.load(Ordering::Relaxed),
            entries: 0,
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Err(CacheError::WriterClosed)
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        Err(CacheError::WriterClosed)
    }
}

/// Create an empty media file under `dir` and return its work item
pub fn media_file(dir: &Path, name: &str) -> WorkItem {
    let path = dir.join(name);
    std::fs::write(&path, b"not really a movie").unwrap();
    WorkItem::new(path)
}

/// Write a `<stem>.json` sidecar next to `item`
pub fn sidecar(item: &WorkItem, json: &str) -> PathBuf {
    let path = item.path().with_extension("json");
    std::fs::write(&path, json).unwrap();
    path
}

/// Artifacts (`*.md`) present in `dir`
pub fn artifacts(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".md"))
        .collect();
    names.sort();
    names
}
