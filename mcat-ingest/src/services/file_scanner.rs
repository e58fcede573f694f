//! Media file scanner
//!
//! Batch discovery for scheduled and one-shot runs: walks library roots and
//! keeps files with a video container extension. The watcher uses
//! [`is_media_path`] for the same filter on incremental events.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// Container extensions treated as ingestible media (lowercase)
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "m4v", "avi", "mov", "wmv", "webm", "ts", "mpg", "mpeg",
];

/// Media file scanner errors
#[derive(Debug, Error)]
pub enum ScanError {
    /// Specified path does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Path exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// True if `path` has a media container extension (case-insensitive)
pub fn is_media_path(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| MEDIA_EXTENSIONS.contains(&ext.as_str()))
}

/// Files found across all roots
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub files: Vec<PathBuf>,
    /// Count of files by extension
    pub by_extension: BTreeMap<String, usize>,
    /// Roots that could not be scanned; the others still contribute
    pub failed_roots: Vec<String>,
}

pub struct FileScanner {
    ignore_patterns: Vec<String>,
    max_depth: Option<usize>,
}

impl FileScanner {
    /// Create new file scanner with default ignore patterns
    ///
    /// Ignores system and download-client leftovers like .DS_Store, .git,
    /// @eaDir and sample folders.
    pub fn new() -> Self {
        Self {
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                ".git".to_string(),
                "@eaDir".to_string(),
                ".Trash".to_string(),
                "Sample".to_string(),
            ],
            max_depth: None,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Scan one directory tree for media files, sorted by path
    pub fn scan(&self, root_path: &Path) -> Result<Vec<PathBuf>, ScanError> {
        if !root_path.exists() {
            return Err(ScanError::PathNotFound(root_path.to_path_buf()));
        }

        if !root_path.is_dir() {
            return Err(ScanError::NotADirectory(root_path.to_path_buf()));
        }

        let mut files = Vec::new();
        let mut symlink_visited = HashSet::new();

        let walker = WalkDir::new(root_path)
            .follow_links(false)
            .max_depth(self.max_depth.unwrap_or(usize::MAX))
            .into_iter()
            .filter_entry(|e| self.should_process_entry(e, &mut symlink_visited));

        for entry in walker {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && is_media_path(entry.path()) {
                        files.push(entry.path().to_path_buf());
                    }
                }
                Err(e) => {
                    // Unreadable entries are skipped, the walk continues
                    tracing::warn!(error = %e, "Error accessing entry");
                }
            }
        }

        files.sort();
        tracing::debug!(root = %root_path.display(), files = files.len(), "Scan complete");

        Ok(files)
    }

    /// Scan every root; a bad root is reported, not fatal
    pub fn scan_roots(&self, roots: &[PathBuf]) -> ScanReport {
        let mut report = ScanReport::default();

        for root in roots {
            match self.scan(root) {
                Ok(files) => report.files.extend(files),
                Err(e) => {
                    tracing::error!(root = %root.display(), error = %e, "Library root scan failed");
                    report.failed_roots.push(e.to_string());
                }
            }
        }

        for file in &report.files {
            if let Some(ext) = file.extension() {
                *report
                    .by_extension
                    .entry(ext.to_string_lossy().to_lowercase())
                    .or_insert(0) += 1;
            }
        }

        tracing::info!(
            roots = roots.len(),
            files = report.files.len(),
            failed_roots = report.failed_roots.len(),
            "Library scan complete"
        );

        report
    }

    fn should_process_entry(&self, entry: &DirEntry, symlink_visited: &mut HashSet<PathBuf>) -> bool {
        // The root itself is never filtered
        if entry.depth() == 0 {
            return true;
        }

        let file_name = entry.file_name().to_string_lossy();
        if self
            .ignore_patterns
            .iter()
            .any(|pattern| file_name.as_ref() == pattern)
        {
            return false;
        }

        if entry.file_type().is_symlink() {
            if let Ok(canonical) = entry.path().canonicalize() {
                if !symlink_visited.insert(canonical) {
                    tracing::warn!(path = %entry.path().display(), "Symlink loop detected");
                    return false;
                }
            }
        }

        true
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_media_extension_detection() {
        assert!(is_media_path(Path::new("/m/The.Matrix.1999.mkv")));
        assert!(is_media_path(Path::new("/m/Heat.1995.MP4")));
        assert!(is_media_path(Path::new("clip.ts")));
        assert!(!is_media_path(Path::new("/m/The.Matrix.1999.srt")));
        assert!(!is_media_path(Path::new("/m/The.Matrix.1999.json")));
        assert!(!is_media_path(Path::new("/m/README")));
    }

    #[test]
    fn test_scan_nonexistent_path() {
        let scanner = FileScanner::new();
        match scanner.scan(Path::new("/nonexistent/path")) {
            Err(ScanError::PathNotFound(_)) => {}
            other => panic!("Expected PathNotFound error, got {:?}", other),
        }
    }

    #[test]
    fn test_scan_file_as_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("Alien.1979.mkv");
        fs::write(&file, b"x").unwrap();

        match FileScanner::new().scan(&file) {
            Err(ScanError::NotADirectory(_)) => {}
            other => panic!("Expected NotADirectory error, got {:?}", other),
        }
    }

    #[test]
    fn test_scan_filters_and_skips_ignored_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("Movies/Heat (1995)")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("Movies/Sample")).unwrap();

        fs::write(root.join("Movies/Heat (1995)/Heat.1995.mkv"), b"x").unwrap();
        fs::write(root.join("Movies/Heat (1995)/Heat.1995.json"), b"{}").unwrap();
        fs::write(root.join("Alien.1979.avi"), b"x").unwrap();
        fs::write(root.join(".git/ignored.mkv"), b"x").unwrap();
        fs::write(root.join("Movies/Sample/sample.mkv"), b"x").unwrap();

        let files = FileScanner::new().scan(root).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["Alien.1979.avi", "Heat.1995.mkv"]);
    }

    #[test]
    fn test_scan_roots_tolerates_bad_root() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("Heat.1995.mkv"), b"x").unwrap();
        fs::write(temp_dir.path().join("Ronin.1998.mp4"), b"x").unwrap();

        let report = FileScanner::new().scan_roots(&[
            temp_dir.path().to_path_buf(),
            PathBuf::from("/nonexistent/library"),
        ]);

        assert_eq!(report.files.len(), 2);
        assert_eq!(report.failed_roots.len(), 1);
        assert_eq!(report.by_extension.get("mkv"), Some(&1));
        assert_eq!(report.by_extension.get("mp4"), Some(&1));
    }

    #[test]
    fn test_max_depth_limits_walk() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("a/b")).unwrap();
        fs::write(temp_dir.path().join("top.mkv"), b"x").unwrap();
        fs::write(temp_dir.path().join("a/b/deep.mkv"), b"x").unwrap();

        let files = FileScanner::new().with_max_depth(1).scan(temp_dir.path()).unwrap();
        assert_eq!(files.len(), 1);
    }
}
