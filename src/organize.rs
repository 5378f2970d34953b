// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Organize engine: copy or move classified PLR files into a niche-keyed library

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::catalog::{calculate_file_hash, Catalog, CatalogEntry};
use crate::classifier::ClassificationResult;
use crate::{CuratorError, Result};

/// Folder used when the classifier gave no niche
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Upper bound on `name (n).ext` attempts before giving up
const MAX_COLLISION_SUFFIX: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrganizeAction {
    /// Source is kept
    #[default]
    Copy,
    /// Source is removed once the destination exists
    Move,
}

impl fmt::Display for OrganizeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy => f.write_str("copy"),
            Self::Move => f.write_str("move"),
        }
    }
}

impl FromStr for OrganizeAction {
    type Err = CuratorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "copy" => Ok(Self::Copy),
            "move" => Ok(Self::Move),
            other => Err(CuratorError::Config(format!("Unknown organize action '{}'", other))),
        }
    }
}

/// One planned file placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizeRequest {
    pub source_path: PathBuf,
    pub niche: Option<String>,
    pub sub_niche: Option<String>,
    pub base_folder: PathBuf,
    pub action: OrganizeAction,
}

impl OrganizeRequest {
    /// `base / niche-or-Uncategorized / [sub_niche] / file name`, before collision handling
    pub fn destination(&self) -> Result<PathBuf> {
        let file_name = self.source_path.file_name().ok_or_else(|| {
            CuratorError::Organize(format!("{:?} has no file name", self.source_path))
        })?;

        let mut dir = self.base_folder.join(
            self.niche
                .as_deref()
                .and_then(sanitize_segment)
                .unwrap_or_else(|| UNCATEGORIZED.to_string()),
        );
        if let Some(sub) = self.sub_niche.as_deref().and_then(sanitize_segment) {
            dir.push(sub);
        }
        Ok(dir.join(file_name))
    }
}

/// Outcome for one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizeResult {
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub success: bool,
    pub error_reason: Option<String>,
}

impl OrganizeResult {
    fn ok(source: PathBuf, destination: PathBuf) -> Self {
        Self { source_path: source, destination_path: destination, success: true, error_reason: None }
    }

    fn failed(source: PathBuf, destination: PathBuf, reason: impl Into<String>) -> Self {
        Self {
            source_path: source,
            destination_path: destination,
            success: false,
            error_reason: Some(reason.into()),
        }
    }
}

/// Every per-file outcome of one organize run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganizeReport {
    pub results: Vec<OrganizeResult>,
    pub cancelled: bool,
}

impl OrganizeReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &OrganizeResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }
}

/// Filesystem capability used to place files
#[async_trait]
pub trait FileMover: Send + Sync {
    /// Copy or move `source` to `destination`; must never overwrite an existing file
    async fn copy_or_move(&self, source: &Path, destination: &Path, action: OrganizeAction) -> Result<()>;

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(true)
    }
}

/// Local filesystem implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct FsMover;

impl FsMover {
    /// Copy through a hidden part file next to `destination`; the real name
    /// only ever holds a complete copy, and is never replaced
    async fn copy_new(source: &Path, destination: &Path) -> Result<()> {
        let mut input = tokio::fs::File::open(source).await?;
        let mut part = PartFile::beside(destination);
        let mut output = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&part.path)
            .await?;

        tokio::io::copy(&mut input, &mut output).await?;
        output.flush().await?;
        output.sync_all().await?;
        drop(output);

        match tokio::fs::hard_link(&part.path, destination).await {
            // the link keeps the data; the part name goes with the guard
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(destination_taken(destination)),
            Err(e) => {
                debug!("Hard link unavailable ({}), renaming into {:?}", e, destination);
                if tokio::fs::try_exists(destination).await.unwrap_or(true) {
                    return Err(destination_taken(destination));
                }
                tokio::fs::rename(&part.path, destination).await?;
                part.committed = true;
                Ok(())
            }
        }
    }
}

fn destination_taken(destination: &Path) -> CuratorError {
    CuratorError::Organize(format!("destination already exists: {:?}", destination))
}

/// Temporary sibling a copy is written to; removed on drop unless committed,
/// which covers errors and a timed-out (dropped) copy alike
struct PartFile {
    path: PathBuf,
    committed: bool,
}

impl PartFile {
    fn beside(destination: &Path) -> Self {
        let name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let part_name = format!(".{}.{}.part", name, uuid::Uuid::new_v4().simple());
        Self { path: destination.with_file_name(part_name), committed: false }
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[async_trait]
impl FileMover for FsMover {
    async fn copy_or_move(&self, source: &Path, destination: &Path, action: OrganizeAction) -> Result<()> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match action {
            OrganizeAction::Copy => Self::copy_new(source, destination).await,
            OrganizeAction::Move => {
                if self.exists(destination).await {
                    return Err(destination_taken(destination));
                }
                match tokio::fs::rename(source, destination).await {
                    Ok(()) => Ok(()),
                    Err(e) if is_cross_device(&e) => {
                        debug!("Cross-device move, copying {:?}", source);
                        Self::copy_new(source, destination).await?;
                        // a move cut short here leaves a complete copy and the source
                        if let Err(e) = tokio::fs::remove_file(source).await {
                            let _ = tokio::fs::remove_file(destination).await;
                            return Err(e.into());
                        }
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }
}

fn is_cross_device(e: &std::io::Error) -> bool {
    #[cfg(unix)]
    const CROSS_DEVICE: i32 = 18; // EXDEV
    #[cfg(windows)]
    const CROSS_DEVICE: i32 = 17; // ERROR_NOT_SAME_DEVICE
    #[cfg(not(any(unix, windows)))]
    const CROSS_DEVICE: i32 = -1;

    e.raw_os_error() == Some(CROSS_DEVICE)
}

/// Make a classifier label safe to use as one directory name
pub fn sanitize_segment(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c == ' ');
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}

/// `name (n).ext` for n = 1, 2, ...
fn suffixed(path: &Path, n: u32) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    };
    path.with_file_name(name)
}

/// Drives copy/move of PLR results into the library
#[derive(Clone)]
pub struct OrganizeEngine {
    mover: Arc<dyn FileMover>,
    catalog: Option<Catalog>,
    action_timeout: Duration,
}

impl OrganizeEngine {
    pub fn new(mover: Arc<dyn FileMover>) -> Self {
        Self {
            mover,
            catalog: None,
            action_timeout: Duration::from_secs(60),
        }
    }

    /// Record every successful placement in `catalog`
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    /// Planned placement for one result
    fn request_for(result: &ClassificationResult, base_folder: &Path, action: OrganizeAction) -> OrganizeRequest {
        OrganizeRequest {
            source_path: result.file_path.clone(),
            niche: result.niche.clone(),
            sub_niche: result.sub_niche.clone(),
            base_folder: base_folder.to_path_buf(),
            action,
        }
    }

    pub async fn organize(
        &self,
        results: &[ClassificationResult],
        base_folder: &Path,
        action: OrganizeAction,
    ) -> OrganizeReport {
        self.organize_observed(results, base_folder, action, None, |_, _| {}).await
    }

    /// Organize PLR results one file at a time. A failing file never stops
    /// the rest; once `cancel` flips, remaining files are reported as cancelled.
    /// `on_result` sees each outcome with the count processed so far.
    pub async fn organize_observed<F>(
        &self,
        results: &[ClassificationResult],
        base_folder: &Path,
        action: OrganizeAction,
        cancel: Option<watch::Receiver<bool>>,
        mut on_result: F,
    ) -> OrganizeReport
    where
        F: FnMut(usize, &OrganizeResult) + Send,
    {
        let plr: Vec<&ClassificationResult> = results.iter().filter(|r| r.is_plr).collect();
        let mut report = OrganizeReport::default();
        let mut reserved: HashSet<PathBuf> = HashSet::new();

        info!("Organizing {} PLR files into {:?} ({})", plr.len(), base_folder, action);

        for (index, result) in plr.into_iter().enumerate() {
            let request = Self::request_for(result, base_folder, action);
            let cancelled = cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false);

            let outcome = if cancelled {
                report.cancelled = true;
                let destination = request.destination().unwrap_or_default();
                OrganizeResult::failed(request.source_path.clone(), destination, "cancelled")
            } else {
                self.place(&request, result, &mut reserved).await
            };

            if !outcome.success && !report.cancelled {
                warn!(
                    "Failed to organize {:?}: {}",
                    outcome.source_path,
                    outcome.error_reason.as_deref().unwrap_or("unknown error")
                );
            }
            on_result(index + 1, &outcome);
            report.results.push(outcome);
        }

        info!("Organized {} of {} files", report.succeeded(), report.results.len());
        report
    }

    async fn place(
        &self,
        request: &OrganizeRequest,
        result: &ClassificationResult,
        reserved: &mut HashSet<PathBuf>,
    ) -> OrganizeResult {
        let source = request.source_path.clone();
        let planned = match request.destination() {
            Ok(p) => p,
            Err(e) => return OrganizeResult::failed(source, PathBuf::new(), e.to_string()),
        };

        let destination = match self.free_destination(&planned, reserved).await {
            Ok(p) => p,
            Err(e) => return OrganizeResult::failed(source, planned, e.to_string()),
        };
        reserved.insert(destination.clone());

        let action = self.mover.copy_or_move(&source, &destination, request.action);
        match tokio::time::timeout(self.action_timeout, action).await {
            Ok(Ok(())) => {
                debug!("{} {:?} -> {:?}", request.action, source, destination);
                self.catalog_placement(result, &destination, request.action).await;
                OrganizeResult::ok(source, destination)
            }
            Ok(Err(e)) => OrganizeResult::failed(source, destination, e.to_string()),
            Err(_) => {
                warn!("{} of {:?} timed out after {:?}", request.action, source, self.action_timeout);
                OrganizeResult::failed(source, destination, CuratorError::Timeout(self.action_timeout).to_string())
            }
        }
    }

    /// First of `planned`, `name (1).ext`, `name (2).ext`, ... not on disk and not reserved
    async fn free_destination(&self, planned: &Path, reserved: &HashSet<PathBuf>) -> Result<PathBuf> {
        if !reserved.contains(planned) && !self.mover.exists(planned).await {
            return Ok(planned.to_path_buf());
        }
        for n in 1..=MAX_COLLISION_SUFFIX {
            let candidate = suffixed(planned, n);
            if !reserved.contains(&candidate) && !self.mover.exists(&candidate).await {
                return Ok(candidate);
            }
        }
        Err(CuratorError::Organize(format!("no free name for {:?}", planned)))
    }

    async fn catalog_placement(&self, result: &ClassificationResult, destination: &Path, action: OrganizeAction) {
        let Some(catalog) = self.catalog.clone() else {
            return;
        };
        let entry_result = result.clone();
        let destination = destination.to_path_buf();

        let recorded = tokio::task::spawn_blocking(move || -> Result<()> {
            let hash = calculate_file_hash(&destination)?;
            catalog.record(&CatalogEntry::new(&entry_result, &destination, hash, action))
        })
        .await;

        match recorded {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to catalog {:?}: {}", result.file_path, e),
            Err(e) => warn!("Catalog task failed for {:?}: {}", result.file_path, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::QualityRating;
    use std::fs;
    use tempfile::tempdir;

    fn plr(path: &Path, niche: Option<&str>, sub: Option<&str>) -> ClassificationResult {
        ClassificationResult {
            file_path: path.to_path_buf(),
            is_plr: true,
            confidence: 0.95,
            content_type: "ebook".to_string(),
            niche: niche.map(String::from),
            sub_niche: sub.map(String::from),
            license_type: "PLR".to_string(),
            quality_rating: QualityRating::B,
            tags: Default::default(),
            reason: String::new(),
        }
    }

    #[test]
    fn test_destination_layout() {
        let request = OrganizeRequest {
            source_path: PathBuf::from("/in/guide.pdf"),
            niche: Some("Health".to_string()),
            sub_niche: Some("Weight Loss".to_string()),
            base_folder: PathBuf::from("/lib"),
            action: OrganizeAction::Copy,
        };
        assert_eq!(request.destination().unwrap(), PathBuf::from("/lib/Health/Weight Loss/guide.pdf"));

        let no_niche = OrganizeRequest { niche: None, sub_niche: None, ..request.clone() };
        assert_eq!(no_niche.destination().unwrap(), PathBuf::from("/lib/Uncategorized/guide.pdf"));

        let hostile = OrganizeRequest { niche: Some("../..".to_string()), sub_niche: Some("a/b".to_string()), ..request };
        assert_eq!(hostile.destination().unwrap(), PathBuf::from("/lib/Uncategorized/a b/guide.pdf"));
    }

    #[test]
    fn test_sanitize_segment() {
        assert_eq!(sanitize_segment("  Make  Money: Online "), Some("Make Money Online".to_string()));
        assert_eq!(sanitize_segment("..."), None);
        assert_eq!(sanitize_segment(""), None);
    }

    #[test]
    fn test_suffixed_names() {
        assert_eq!(suffixed(Path::new("/l/a.pdf"), 2), PathBuf::from("/l/a (2).pdf"));
        assert_eq!(suffixed(Path::new("/l/README"), 1), PathBuf::from("/l/README (1)"));
    }

    #[tokio::test]
    async fn test_copy_keeps_source_and_never_overwrites() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("lib");
        let src = dir.path().join("in");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(base.join("Health")).unwrap();
        fs::write(base.join("Health/guide.pdf"), "existing").unwrap();
        fs::write(src.join("guide.pdf"), "new").unwrap();

        let results = vec![plr(&src.join("guide.pdf"), Some("Health"), None)];
        let engine = OrganizeEngine::new(Arc::new(FsMover));
        let report = engine.organize(&results, &base, OrganizeAction::Copy).await;

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.results[0].destination_path, base.join("Health/guide (1).pdf"));
        assert_eq!(fs::read_to_string(base.join("Health/guide.pdf")).unwrap(), "existing");
        assert_eq!(fs::read_to_string(base.join("Health/guide (1).pdf")).unwrap(), "new");
        assert!(src.join("guide.pdf").exists());
    }

    #[tokio::test]
    async fn test_same_name_in_one_run_gets_distinct_destinations() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("lib");
        for sub in ["x", "y"] {
            fs::create_dir_all(dir.path().join(sub)).unwrap();
            fs::write(dir.path().join(sub).join("bundle.zip"), sub).unwrap();
        }
        let results = vec![
            plr(&dir.path().join("x/bundle.zip"), Some("Marketing"), None),
            plr(&dir.path().join("y/bundle.zip"), Some("Marketing"), None),
        ];

        let catalog = Catalog::in_memory().unwrap();
        let engine = OrganizeEngine::new(Arc::new(FsMover)).with_catalog(catalog.clone());
        let report = engine.organize(&results, &base, OrganizeAction::Move).await;

        assert_eq!(report.succeeded(), 2);
        assert_eq!(fs::read_to_string(base.join("Marketing/bundle.zip")).unwrap(), "x");
        assert_eq!(fs::read_to_string(base.join("Marketing/bundle (1).zip")).unwrap(), "y");
        assert!(!dir.path().join("x/bundle.zip").exists());
        assert_eq!(catalog.stats().unwrap().file_count, 2);
        assert!(catalog.contains_destination(&base.join("Marketing/bundle (1).zip")).unwrap());

        // each placement is cataloged with its own source
        let entries = catalog.by_niche("Marketing", 10).unwrap();
        for (source, destination) in [("x/bundle.zip", "Marketing/bundle.zip"), ("y/bundle.zip", "Marketing/bundle (1).zip")] {
            assert!(entries
                .iter()
                .any(|e| e.source_path == dir.path().join(source) && e.destination_path == base.join(destination)));
        }
    }

    #[tokio::test]
    async fn test_missing_source_fails_alone() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("lib");
        fs::write(dir.path().join("real.pdf"), "r").unwrap();
        let results = vec![
            plr(&dir.path().join("ghost.pdf"), Some("Health"), None),
            plr(&dir.path().join("real.pdf"), Some("Health"), None),
        ];

        let report = OrganizeEngine::new(Arc::new(FsMover))
            .organize(&results, &base, OrganizeAction::Move)
            .await;
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert!(report.results[0].error_reason.is_some());
        assert!(base.join("Health/real.pdf").exists());
    }

    #[tokio::test]
    async fn test_non_plr_results_are_skipped() {
        let dir = tempdir().unwrap();
        let mut not_plr = plr(&dir.path().join("x.pdf"), Some("Health"), None);
        not_plr.is_plr = false;
        let report = OrganizeEngine::new(Arc::new(FsMover))
            .organize(&[not_plr], dir.path(), OrganizeAction::Copy)
            .await;
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_copy_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("lib");
        fs::create_dir_all(dir.path().join("in")).unwrap();
        let big = dir.path().join("in/big_course.zip");
        // sparse: large to read, cheap to create
        fs::File::create(&big).unwrap().set_len(2 << 30).unwrap();

        let engine = OrganizeEngine::new(Arc::new(FsMover)).with_action_timeout(Duration::from_millis(100));
        let report = engine
            .organize(&[plr(&big, Some("Health"), None)], &base, OrganizeAction::Copy)
            .await;

        assert_eq!(report.failed(), 1);
        assert!(report.results[0].error_reason.as_deref().unwrap().contains("timed out"));
        assert!(!base.join("Health/big_course.zip").exists());
        let leftovers: Vec<_> = fs::read_dir(base.join("Health")).unwrap().collect();
        assert!(leftovers.is_empty(), "partial copy left behind: {:?}", leftovers);
        assert!(big.exists());

        // the real name is still free for the next run
        fs::create_dir_all(dir.path().join("again")).unwrap();
        let small = dir.path().join("again/big_course.zip");
        fs::write(&small, "ok").unwrap();
        let report = OrganizeEngine::new(Arc::new(FsMover))
            .organize(&[plr(&small, Some("Health"), None)], &base, OrganizeAction::Copy)
            .await;
        assert_eq!(report.results[0].destination_path, base.join("Health/big_course.zip"));
        assert_eq!(fs::read_to_string(base.join("Health/big_course.zip")).unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_copy_refuses_a_taken_name() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.pdf"), "new").unwrap();
        fs::write(dir.path().join("b.pdf"), "old").unwrap();

        let err = FsMover
            .copy_or_move(&dir.path().join("a.pdf"), &dir.path().join("b.pdf"), OrganizeAction::Copy)
            .await;
        assert!(matches!(err, Err(CuratorError::Organize(_))));
        assert_eq!(fs::read_to_string(dir.path().join("b.pdf")).unwrap(), "old");
        // only the two originals remain
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_cancel_marks_remaining_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.pdf"), "a").unwrap();
        let results = vec![plr(&dir.path().join("a.pdf"), None, None)];
        let (_tx, rx) = watch::channel(true);

        let report = OrganizeEngine::new(Arc::new(FsMover))
            .organize_observed(&results, &dir.path().join("lib"), OrganizeAction::Copy, Some(rx), |_, _| {})
            .await;
        assert!(report.cancelled);
        assert_eq!(report.results[0].error_reason.as_deref(), Some("cancelled"));
        assert!(dir.path().join("a.pdf").exists());
    }
}
