//! Per-item processing outcome

use serde::{Deserialize, Serialize};

use super::WorkItem;
use crate::error::IngestError;

/// Which path produced an item's enrichment payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    /// Fresh cache entry, no external call
    Cache,
    /// Remote metadata provider only
    Primary,
    /// Local sidecar file only
    Fallback,
    /// Remote provider with gaps filled from the sidecar
    Merged,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Cache => "cache",
            SourceTag::Primary => "primary",
            SourceTag::Fallback => "fallback",
            SourceTag::Merged => "merged",
        }
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an item processor reports for one item
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    pub source: Option<SourceTag>,
    pub slug: Option<String>,
    /// The slug was already claimed in this run; nothing was written
    pub duplicate: bool,
    pub error: Option<IngestError>,
}

impl ProcessOutcome {
    /// Artifact written for `slug` using metadata from `source`
    pub fn written(source: SourceTag, slug: impl Into<String>) -> Self {
        Self {
            source: Some(source),
            slug: Some(slug.into()),
            duplicate: false,
            error: None,
        }
    }

    /// Lost the slug claim; not an error
    pub fn duplicate(slug: impl Into<String>) -> Self {
        Self {
            source: None,
            slug: Some(slug.into()),
            duplicate: true,
            error: None,
        }
    }

    pub fn failed(error: IngestError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }
}

/// Outcome of running one work item; never mutated after creation
#[derive(Debug)]
pub struct ProcessResult {
    pub item: WorkItem,
    pub source: Option<SourceTag>,
    pub slug: Option<String>,
    pub duplicate: bool,
    pub error: Option<IngestError>,
}

impl ProcessResult {
    pub fn from_outcome(item: WorkItem, outcome: ProcessOutcome) -> Self {
        Self {
            item,
            source: outcome.source,
            slug: outcome.slug,
            duplicate: outcome.duplicate,
            error: outcome.error,
        }
    }

    pub fn cancelled(item: WorkItem) -> Self {
        Self::from_outcome(item, ProcessOutcome::failed(IngestError::Cancelled))
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.as_ref().is_some_and(IngestError::is_cancelled)
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_tag_serializes_lowercase() {
        let json = serde_json::to_string(&SourceTag::Merged).unwrap();
        assert_eq!(json, "\"merged\"");
        assert_eq!(SourceTag::Cache.to_string(), "cache");
    }

    #[test]
    fn test_duplicate_outcome_is_not_an_error() {
        let result = ProcessResult::from_outcome(
            WorkItem::new("/m/a.mkv"),
            ProcessOutcome::duplicate("the-matrix-1999"),
        );
        assert!(result.duplicate);
        assert!(result.is_success());
        assert_eq!(result.slug.as_deref(), Some("the-matrix-1999"));
    }

    #[test]
    fn test_cancelled_result_is_distinguishable() {
        let result = ProcessResult::cancelled(WorkItem::new("/m/a.mkv"));
        assert!(result.is_cancelled());
        assert!(!result.is_success());

        let failed = ProcessResult::from_outcome(
            WorkItem::new("/m/b.mkv"),
            ProcessOutcome::failed(IngestError::NoMetadata("b".into())),
        );
        assert!(!failed.is_cancelled());
    }
}
