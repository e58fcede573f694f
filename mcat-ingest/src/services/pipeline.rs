//! Per-item ingest pipeline
//!
//! parse → slug claim → cache → primary (with retry) + sidecar → cache set → artifact
//!
//! Every failure below is captured in the item's outcome; nothing here
//! aborts the run. Cancellation is admission control in the worker pool:
//! an item that has started here always runs to completion.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::artifact_writer::ArtifactWriter;
use super::filename_parser::{parse_filename, TitleQuery};
use super::metadata_client::{FetchError, MetadataSource};
use super::sidecar::load_sidecar;
use crate::cache::Cache;
use crate::engine::{ItemProcessor, SlugGuard};
use crate::error::IngestError;
use crate::models::{MediaMetadata, ProcessOutcome, SourceTag, WorkItem};
use crate::utils::{retry, RetryPolicy};

/// Cache key for a slug's metadata
pub fn cache_key(slug: &str) -> String {
    format!("meta:{}", slug)
}

#[derive(Clone)]
pub struct IngestPipeline {
    guard: Arc<SlugGuard>,
    cache: Option<Arc<dyn Cache>>,
    cache_ttl: Duration,
    primary: Option<Arc<dyn MetadataSource>>,
    retry_policy: RetryPolicy,
    writer: ArtifactWriter,
}

impl IngestPipeline {
    /// Pipeline with no cache and no remote provider; sidecars only
    pub fn new(writer: ArtifactWriter) -> Self {
        Self {
            guard: Arc::new(SlugGuard::new()),
            cache: None,
            cache_ttl: Duration::from_secs(7 * 24 * 3600),
            primary: None,
            retry_policy: RetryPolicy::default(),
            writer,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        self.cache = Some(cache);
        self.cache_ttl = ttl;
        self
    }

    pub fn with_primary(mut self, source: Arc<dyn MetadataSource>, policy: RetryPolicy) -> Self {
        self.primary = Some(source);
        self.retry_policy = policy;
        self
    }

    /// Same collaborators, new slug guard; call once per run
    pub fn for_new_run(&self) -> Self {
        Self {
            guard: Arc::new(SlugGuard::new()),
            ..self.clone()
        }
    }

    pub fn guard(&self) -> &SlugGuard {
        &self.guard
    }

    pub fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.cache.as_ref()
    }

    async fn cached(&self, slug: &str) -> Option<MediaMetadata> {
        let cache = self.cache.as_ref()?;
        let raw = cache.get(&cache_key(slug)).await?;
        match serde_json::from_str(&raw) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                tracing::warn!(slug, error = %e, "Unreadable cache entry, fetching again");
                None
            }
        }
    }

    async fn fetch_primary(&self, query: &TitleQuery) -> Result<Option<MediaMetadata>, FetchError> {
        let Some(source) = &self.primary else {
            return Ok(None);
        };
        retry("metadata lookup", &self.retry_policy, || source.lookup(query))
            .await
            .map(Some)
    }

    /// Resolve metadata for the item and the path that produced it
    async fn resolve(
        &self,
        item: &WorkItem,
        query: &TitleQuery,
        slug: &str,
    ) -> Result<(MediaMetadata, SourceTag), IngestError> {
        if let Some(metadata) = self.cached(slug).await {
            return Ok((metadata, SourceTag::Cache));
        }

        let primary = self.fetch_primary(query).await;

        let sidecar = match load_sidecar(item.path()).await {
            Ok(sidecar) => sidecar,
            Err(e) => {
                tracing::warn!(file = %item.path().display(), error = %e, "Ignoring sidecar");
                None
            }
        };

        let (metadata, source) = match (primary, sidecar) {
            (Ok(Some(primary)), Some(sidecar)) => (primary.merge_from(&sidecar), SourceTag::Merged),
            (Ok(Some(primary)), None) => (primary, SourceTag::Primary),
            (primary, Some(sidecar)) => {
                if let Err(e) = primary {
                    tracing::info!(slug, error = %e, "Primary lookup failed, using sidecar");
                }
                let from_name = MediaMetadata {
                    title: query.title.clone(),
                    year: query.year,
                    ..MediaMetadata::default()
                };
                (sidecar.merge_from(&from_name), SourceTag::Fallback)
            }
            (Err(e), None) => return Err(IngestError::Fetch(e)),
            (Ok(None), None) => return Err(IngestError::NoMetadata(slug.to_string())),
        };

        // Sidecar-only results are not cached, so a later run can still reach the provider
        if source != SourceTag::Fallback {
            self.store(slug, &metadata).await;
        }

        Ok((metadata, source))
    }

    /// Cache write failures are counted by the cache and logged here; never fatal
    async fn store(&self, slug: &str, metadata: &MediaMetadata) {
        let Some(cache) = &self.cache else {
            return;
        };
        let value = match serde_json::to_string(metadata) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(slug, error = %e, "Cannot serialize metadata for cache");
                return;
            }
        };
        if let Err(e) = cache.set(&cache_key(slug), value, self.cache_ttl).await {
            tracing::warn!(slug, error = %e, "Cache write failed, continuing without caching");
        }
    }
}

#[async_trait]
impl ItemProcessor for IngestPipeline {
    async fn process(&self, _cancel: &CancellationToken, item: &WorkItem) -> ProcessOutcome {
        let Some(query) = parse_filename(item.path()) else {
            tracing::warn!(file = %item.path().display(), "Cannot derive a title from filename");
            return ProcessOutcome::failed(IngestError::Parse(item.file_name()));
        };
        let slug = query.slug();

        if !self.guard.try_claim(&slug) {
            tracing::info!(file = %item.path().display(), slug = %slug, "Output already claimed in this run");
            return ProcessOutcome::duplicate(slug);
        }

        let (metadata, source) = match self.resolve(item, &query, &slug).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(file = %item.path().display(), slug = %slug, error = %e, "Item failed");
                return ProcessOutcome::failed(e).with_slug(slug);
            }
        };

        match self.writer.write(&slug, &metadata, source, item).await {
            Ok(_) => {
                tracing::debug!(slug = %slug, source = %source, "Item ingested");
                ProcessOutcome::written(source, slug)
            }
            Err(e) => {
                tracing::warn!(slug = %slug, error = %e, "Artifact write failed");
                ProcessOutcome::failed(IngestError::Write {
                    slug: slug.clone(),
                    source: e,
                })
                .with_slug(slug)
            }
        }
    }
}
