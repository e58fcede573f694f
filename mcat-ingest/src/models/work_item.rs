//! Work item: one discovered media file

use std::path::{Path, PathBuf};

/// An opaque unit of work
///
/// Created by discovery (directory walk or filesystem event) and owned by the
/// producing trigger until handed to the worker pool. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    path: PathBuf,
}

impl WorkItem {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without directory, lossily decoded
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl From<PathBuf> for WorkItem {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}
