//! Data models for mcat-ingest

pub mod metadata;
pub mod process_result;
pub mod run_summary;
pub mod work_item;

pub use metadata::MediaMetadata;
pub use process_result::{ProcessOutcome, ProcessResult, SourceTag};
pub use run_summary::RunSummary;
pub use work_item::WorkItem;
