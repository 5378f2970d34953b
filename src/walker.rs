// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Folder walking: enumerate candidate files below a selected root

use async_trait::async_trait;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use walkdir::{DirEntry, WalkDir};

use crate::options::{MaxDepth, ScanOptions};
use crate::{CuratorError, Result};

/// A discovered file, as handed to the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    /// Lowercase extension, empty when the file has none
    #[serde(rename = "type")]
    pub file_type: String,
}

impl FileDescriptor {
    pub fn from_path(path: &Path, size: u64) -> Self {
        Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.to_path_buf(),
            size,
            file_type: path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_default(),
        }
    }
}

/// Enumerates candidate files below a root folder
#[async_trait]
pub trait FolderWalker: Send + Sync {
    /// Walk `root`, honouring type filter, depth and recursion flag.
    /// Fails with `CuratorError::Walk` when the root itself is inaccessible.
    async fn walk(&self, root: &Path, options: &ScanOptions) -> Result<Vec<FileDescriptor>>;
}

/// Filesystem walker backed by `walkdir`
#[derive(Debug, Clone, Default)]
pub struct FsWalker {
    ignore_patterns: Vec<Pattern>,
}

impl FsWalker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip any path matching one of these glob patterns
    pub fn with_ignore_patterns(mut self, globs: &[String]) -> Self {
        self.ignore_patterns = globs
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect();
        self
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignore_patterns.iter().any(|p| p.matches_path(path))
    }

    /// Synchronous walk, run on a blocking thread by the async wrapper
    pub fn walk_blocking(&self, root: &Path, options: &ScanOptions) -> Result<Vec<FileDescriptor>> {
        check_root(root)?;

        let walk = WalkDir::new(root)
            .follow_links(false)
            .max_depth(walk_depth(options))
            .sort_by_file_name();

        let mut files = Vec::new();
        let entries = walk
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || (!is_hidden(e) && !self.is_ignored(e.path())));

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {:?}: {}", root, e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if !should_process(path) {
                continue;
            }

            let descriptor = match entry.metadata() {
                Ok(meta) => FileDescriptor::from_path(path, meta.len()),
                Err(e) => {
                    warn!("Cannot stat {:?}: {}", path, e);
                    continue;
                }
            };

            if options.accepts_extension(&descriptor.file_type) {
                files.push(descriptor);
            }
        }

        debug!("Walked {:?}: {} candidate files", root, files.len());
        Ok(files)
    }
}

#[async_trait]
impl FolderWalker for FsWalker {
    async fn walk(&self, root: &Path, options: &ScanOptions) -> Result<Vec<FileDescriptor>> {
        let walker = self.clone();
        let root = root.to_path_buf();
        let options = options.clone();

        tokio::task::spawn_blocking(move || walker.walk_blocking(&root, &options))
            .await
            .map_err(|e| CuratorError::InvalidState(format!("Walker task failed: {}", e)))?
    }
}

/// `walkdir` depth: the root is level 0 and its direct files are level 1
fn walk_depth(options: &ScanOptions) -> usize {
    if !options.include_subfolders {
        return 1;
    }
    match options.max_depth {
        MaxDepth::Levels(n) => n.saturating_add(1),
        MaxDepth::Unlimited => usize::MAX,
    }
}

fn check_root(root: &Path) -> Result<()> {
    let walk_error = |reason: String| CuratorError::Walk {
        root: root.to_path_buf(),
        reason,
    };

    let meta = std::fs::metadata(root).map_err(|e| walk_error(e.to_string()))?;
    if !meta.is_dir() {
        return Err(walk_error("not a directory".to_string()));
    }
    std::fs::read_dir(root).map_err(|e| walk_error(e.to_string()))?;
    Ok(())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Check if a file should be offered to the classifier
pub fn should_process(path: &Path) -> bool {
    let filename = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };

    // Skip hidden files
    if filename.starts_with('.') {
        return false;
    }

    // Skip partial downloads
    let temp_extensions = [".tmp", ".part", ".crdownload", ".partial", ".download"];
    if temp_extensions.iter().any(|ext| filename.ends_with(ext)) {
        return false;
    }

    let skip_names = ["desktop.ini", "thumbs.db", ".ds_store"];
    !skip_names.iter().any(|n| filename.eq_ignore_ascii_case(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn tree() -> tempfile::TempDir {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::create_dir_all(root.join(".hidden")).unwrap();
        fs::write(root.join("top.pdf"), "x").unwrap();
        fs::write(root.join("notes.TXT"), "xy").unwrap();
        fs::write(root.join("a/one.pdf"), "xyz").unwrap();
        fs::write(root.join("a/b/two.pdf"), "xyzw").unwrap();
        fs::write(root.join(".hidden/secret.pdf"), "s").unwrap();
        fs::write(root.join("big.pdf.part"), "p").unwrap();
        tmp
    }

    fn names(files: &[FileDescriptor]) -> Vec<String> {
        files.iter().map(|f| f.name.clone()).collect()
    }

    #[test]
    fn test_unlimited_depth_and_filter() {
        let tmp = tree();
        let options = ScanOptions::default().with_file_types(["pdf"]);
        let files = FsWalker::new().walk_blocking(tmp.path(), &options).unwrap();
        // depth-first, each directory sorted by name
        assert_eq!(names(&files), vec!["two.pdf", "one.pdf", "top.pdf"]);
        assert_eq!(files[0].size, 4);
        assert_eq!(files[0].file_type, "pdf");
    }

    #[test]
    fn test_depth_limits() {
        let tmp = tree();
        let mut options = ScanOptions::default().with_file_types(["pdf", "txt"]);

        options.max_depth = MaxDepth::Levels(1);
        let files = FsWalker::new().walk_blocking(tmp.path(), &options).unwrap();
        assert_eq!(names(&files), vec!["one.pdf", "notes.TXT", "top.pdf"]);

        options.include_subfolders = false;
        options.max_depth = MaxDepth::Unlimited;
        let files = FsWalker::new().walk_blocking(tmp.path(), &options).unwrap();
        assert_eq!(names(&files), vec!["notes.TXT", "top.pdf"]);
    }

    #[test]
    fn test_ignore_patterns() {
        let tmp = tree();
        let pattern = format!("{}/a", tmp.path().display());
        let walker = FsWalker::new().with_ignore_patterns(&[pattern, "[".to_string()]);
        let options = ScanOptions::default().with_file_types(["pdf"]);
        let files = walker.walk_blocking(tmp.path(), &options).unwrap();
        assert_eq!(names(&files), vec!["top.pdf"]);
    }

    #[test]
    fn test_missing_root_is_walk_error() {
        let tmp = tempdir().unwrap();
        let missing = tmp.path().join("nope");
        let err = FsWalker::new()
            .walk_blocking(&missing, &ScanOptions::default())
            .unwrap_err();
        assert!(matches!(err, CuratorError::Walk { .. }));
    }

    #[test]
    fn test_should_process() {
        assert!(should_process(Path::new("/x/bundle.zip")));
        assert!(!should_process(Path::new("/x/.DS_Store")));
        assert!(!should_process(Path::new("/x/Thumbs.db")));
        assert!(!should_process(Path::new("/x/file.crdownload")));
    }
}
