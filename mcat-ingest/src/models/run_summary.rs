//! Run-level aggregation of item results

use std::collections::BTreeMap;

use mcat_common::events::RunCounts;
use serde::Serialize;

use super::{ProcessResult, SourceTag};

/// Aggregate counts over one worker pool run
///
/// Every result lands in exactly one of `succeeded`, `duplicates`, `failed`
/// or `cancelled`, so the four always sum to `total`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    /// Artifact written
    pub succeeded: usize,
    /// Slug already claimed earlier in the run; no artifact, no error
    pub duplicates: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Successful items per enrichment source
    pub by_source: BTreeMap<SourceTag, usize>,
}

impl RunSummary {
    pub fn from_results(results: &[ProcessResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };

        for result in results {
            match &result.error {
                Some(e) if e.is_cancelled() => summary.cancelled += 1,
                Some(_) => summary.failed += 1,
                None if result.duplicate => summary.duplicates += 1,
                None => {
                    summary.succeeded += 1;
                    if let Some(source) = result.source {
                        *summary.by_source.entry(source).or_insert(0) += 1;
                    }
                }
            }
        }

        summary
    }

    /// True when any item failed or was cancelled
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.cancelled > 0
    }

    pub fn to_counts(&self) -> RunCounts {
        RunCounts {
            total: self.total,
            succeeded: self.succeeded,
            duplicates: self.duplicates,
            failed: self.failed,
            cancelled: self.cancelled,
            by_source: self
                .by_source
                .iter()
                .map(|(tag, count)| (tag.as_str().to_string(), *count))
                .collect(),
        }
    }

    /// Log the summary and one line per source tag
    pub fn log(&self) {
        tracing::info!(
            total = self.total,
            succeeded = self.succeeded,
            duplicates = self.duplicates,
            failed = self.failed,
            cancelled = self.cancelled,
            "Run summary"
        );
        for (source, count) in &self.by_source {
            tracing::info!(source = %source, count, "Items by source");
        }
    }
}
