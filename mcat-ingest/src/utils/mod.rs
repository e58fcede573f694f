//! Utility modules for mcat-ingest

pub mod retry;

pub use retry::{retry, Classify, ErrorClass, RetryPolicy};
