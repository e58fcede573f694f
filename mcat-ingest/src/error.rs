//! Error types for mcat-ingest
//!
//! Item-level errors are captured in that item's `ProcessResult`; nothing
//! below the item boundary aborts a run.

use thiserror::Error;

use crate::services::metadata_client::FetchError;

/// Terminal failure of a single work item
#[derive(Debug, Error)]
pub enum IngestError {
    /// The run's cancellation token fired before this item started
    #[error("Cancelled before processing")]
    Cancelled,

    /// Filename could not be turned into a title/year query
    #[error("Cannot parse filename {0}")]
    Parse(String),

    /// External metadata fetch failed after the retry policy gave up
    #[error("Metadata fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Neither the primary source nor a local sidecar produced metadata
    #[error("No metadata available for {0}")]
    NoMetadata(String),

    /// Artifact could not be written
    #[error("Artifact write failed for {slug}: {source}")]
    Write {
        slug: String,
        #[source]
        source: std::io::Error,
    },

    /// The item's processing task panicked
    #[error("Processing task panicked: {0}")]
    Panicked(String),
}

impl IngestError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IngestError::Cancelled)
    }
}
