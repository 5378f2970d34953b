// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Scan orchestrator: walk, batch, classify, aggregate, organize, record

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::batcher::ClassificationBatcher;
use crate::catalog::{calculate_file_hash, Catalog};
use crate::classifier::{ClassificationResult, OllamaClassifier};
use crate::config::AppConfig;
use crate::history::{ScanHistory, ScanHistoryRecord, ScanStatus};
use crate::options::ScanOptions;
use crate::organize::{FsMover, OrganizeAction, OrganizeEngine, OrganizeReport, OrganizeResult};
use crate::walker::{FileDescriptor, FolderWalker, FsWalker};
use crate::{CuratorError, Result};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    #[default]
    Idle,
    Scanning,
    Organizing,
    Completed,
    Cancelled,
    Failed,
}

impl ScanState {
    /// Scanning or organizing
    pub fn is_active(self) -> bool {
        matches!(self, Self::Scanning | Self::Organizing)
    }
}

impl From<ScanStatus> for ScanState {
    fn from(status: ScanStatus) -> Self {
        match status {
            ScanStatus::Completed => Self::Completed,
            ScanStatus::Cancelled => Self::Cancelled,
            ScanStatus::Failed => Self::Failed,
        }
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Organizing => "organizing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Files classified so far out of the files discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ScanProgress {
    pub processed: usize,
    pub total: usize,
}

impl ScanProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.processed.min(self.total) as f64 / self.total as f64
        }
    }
}

/// Where and how auto-organize places PLR files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizeTarget {
    pub base_folder: PathBuf,
    pub action: OrganizeAction,
}

/// Progress and result notifications, emitted at real suspension points
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    Started { scan_id: String, folders: Vec<PathBuf> },
    RootWalked { root: PathBuf, files: usize },
    WalkFailed { root: PathBuf, reason: String },
    BatchCompleted { index: usize, batches: usize, results: usize },
    BatchFailed { index: usize, batches: usize, reason: String },
    Progress { processed: usize, total: usize },
    Organizing { files: usize },
    FileOrganized { done: usize, result: OrganizeResult },
    Finished { scan_id: String, status: ScanStatus, files_found: usize, plr_files_detected: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkFailure {
    pub root: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Zero-based batch index
    pub index: usize,
    pub files: usize,
    pub reason: String,
}

/// Everything one scan run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_id: String,
    pub status: ScanStatus,
    pub files_found: usize,
    /// Files dropped before batching because the catalog already knows them
    pub skipped_known: usize,
    /// Aggregated results in discovery order, after the speed-mode filter
    pub results: Vec<ClassificationResult>,
    pub walk_failures: Vec<WalkFailure>,
    pub batch_failures: Vec<BatchFailure>,
    pub organize: Option<OrganizeReport>,
    pub history: ScanHistoryRecord,
    /// False when the history record could not be persisted
    pub history_saved: bool,
}

impl ScanReport {
    pub fn plr_results(&self) -> impl Iterator<Item = &ClassificationResult> {
        self.results.iter().filter(|r| r.is_plr)
    }
}

#[derive(Default)]
struct RunState {
    state: ScanState,
    progress: ScanProgress,
    cancel: Option<watch::Sender<bool>>,
    last_report: Option<ScanReport>,
}

/// Drives one scan at a time through the pipeline
pub struct ScanOrchestrator {
    walker: Arc<dyn FolderWalker>,
    batcher: ClassificationBatcher,
    organizer: OrganizeEngine,
    history: Arc<ScanHistory>,
    catalog: Option<Catalog>,
    skip_cataloged: bool,
    auto_organize: Option<OrganizeTarget>,
    user_id: String,
    run: Arc<Mutex<RunState>>,
    events: broadcast::Sender<ScanEvent>,
}

impl ScanOrchestrator {
    pub fn new(
        walker: Arc<dyn FolderWalker>,
        batcher: ClassificationBatcher,
        organizer: OrganizeEngine,
        history: Arc<ScanHistory>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            walker,
            batcher,
            organizer,
            history,
            catalog: None,
            skip_cataloged: false,
            auto_organize: None,
            user_id: "local".to_string(),
            run: Arc::new(Mutex::new(RunState::default())),
            events,
        }
    }

    /// Build the production pipeline: walkdir walker, Ollama classifier, filesystem mover
    pub fn from_config(config: &AppConfig, history: Arc<ScanHistory>, catalog: Option<Catalog>) -> Result<Self> {
        let walker = FsWalker::new().with_ignore_patterns(&config.scan.ignore_patterns);
        let classifier = OllamaClassifier::new(&config.classifier)?;
        let batcher = ClassificationBatcher::new(
            Arc::new(classifier),
            config.scan.batch_size,
            config.scan.batch_timeout(),
        );

        let mut organizer =
            OrganizeEngine::new(Arc::new(FsMover)).with_action_timeout(config.organize.action_timeout());
        if let Some(catalog) = &catalog {
            organizer = organizer.with_catalog(catalog.clone());
        }

        let auto_organize = if config.organize.auto_organize {
            let base_folder = config.organize.base_folder.clone().ok_or_else(|| {
                CuratorError::Config("organize.auto_organize needs organize.base_folder".to_string())
            })?;
            Some(OrganizeTarget { base_folder, action: config.organize.action })
        } else {
            None
        };

        let mut orchestrator = Self::new(Arc::new(walker), batcher, organizer, history)
            .with_user_id(&config.user_id)
            .with_auto_organize(auto_organize);
        if let Some(catalog) = catalog {
            orchestrator = orchestrator.with_catalog(catalog, config.scan.skip_cataloged);
        }
        Ok(orchestrator)
    }

    /// Consult `catalog` before batching when `skip_known` is set
    pub fn with_catalog(mut self, catalog: Catalog, skip_known: bool) -> Self {
        self.catalog = Some(catalog);
        self.skip_cataloged = skip_known;
        self
    }

    pub fn with_auto_organize(mut self, target: Option<OrganizeTarget>) -> Self {
        self.auto_organize = target;
        self
    }

    pub fn with_user_id(mut self, user_id: &str) -> Self {
        self.user_id = user_id.to_string();
        self
    }

    pub fn auto_organize(&self) -> Option<&OrganizeTarget> {
        self.auto_organize.as_ref()
    }

    pub fn state(&self) -> ScanState {
        self.lock_run().state
    }

    pub fn progress(&self) -> ScanProgress {
        self.lock_run().progress
    }

    pub fn last_report(&self) -> Option<ScanReport> {
        self.lock_run().last_report.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    /// Stop submitting batches or organize actions; the run ends as cancelled
    pub fn cancel_scan(&self) -> Result<()> {
        let run = self.lock_run();
        match (&run.cancel, run.state.is_active()) {
            (Some(cancel), true) => {
                cancel.send_replace(true);
                info!("Cancellation requested while {}", run.state);
                Ok(())
            }
            _ => Err(CuratorError::InvalidState(format!("cannot cancel while {}", run.state))),
        }
    }

    /// Scan with the configured auto-organize target
    pub async fn start_scan(&self, folders: &[PathBuf], options: &ScanOptions) -> Result<ScanReport> {
        let target = self.auto_organize.clone();
        self.start_scan_with(folders, options, target).await
    }

    /// Scan `folders`; PLR results are organized into `organize` when given.
    /// Rejected when nothing is selected or another scan is active.
    pub async fn start_scan_with(
        &self,
        folders: &[PathBuf],
        options: &ScanOptions,
        organize: Option<OrganizeTarget>,
    ) -> Result<ScanReport> {
        let ticket = self.begin_scan(folders)?;
        self.run_scan(ticket, options, organize).await
    }

    /// Claim the orchestrator for a scan of `folders` without running it yet.
    ///
    /// The state is `Scanning` once this returns, so a second caller gets
    /// `ScanInProgress` even before the first run is polled. Dropping the
    /// ticket unrun releases the claim as cancelled.
    pub fn begin_scan(&self, folders: &[PathBuf]) -> Result<ScanTicket> {
        if folders.is_empty() {
            return Err(CuratorError::NoSelection);
        }

        let mut run = self.lock_run();
        if run.state.is_active() {
            return Err(CuratorError::ScanInProgress);
        }
        let (tx, rx) = watch::channel(false);
        run.state = ScanState::Scanning;
        run.progress = ScanProgress::default();
        run.cancel = Some(tx);
        run.last_report = None;

        Ok(ScanTicket {
            run: self.run.clone(),
            folders: folders.to_vec(),
            cancel: rx,
            finished: false,
        })
    }

    /// Run a scan claimed with [`begin_scan`](Self::begin_scan)
    pub async fn run_scan(
        &self,
        mut ticket: ScanTicket,
        options: &ScanOptions,
        organize: Option<OrganizeTarget>,
    ) -> Result<ScanReport> {
        if !Arc::ptr_eq(&ticket.run, &self.run) {
            return Err(CuratorError::InvalidState("scan ticket belongs to another orchestrator".to_string()));
        }

        let folders = ticket.folders.clone();
        let report = self
            .run_pipeline(&folders, options, organize.as_ref(), ticket.cancel.clone())
            .await;

        {
            let mut run = self.lock_run();
            run.state = report.status.into();
            run.cancel = None;
            run.last_report = Some(report.clone());
        }
        ticket.finished = true;

        self.emit(ScanEvent::Finished {
            scan_id: report.scan_id.clone(),
            status: report.status,
            files_found: report.files_found,
            plr_files_detected: report.history.plr_files_detected,
        });

        if report.status == ScanStatus::Failed && report.walk_failures.len() == folders.len() {
            if let Some(first) = report.walk_failures.first() {
                error!("Every selected folder failed to walk");
                return Err(CuratorError::Walk {
                    root: first.root.clone(),
                    reason: first.reason.clone(),
                });
            }
        }
        Ok(report)
    }

    async fn run_pipeline(
        &self,
        folders: &[PathBuf],
        options: &ScanOptions,
        organize: Option<&OrganizeTarget>,
        mut cancel: watch::Receiver<bool>,
    ) -> ScanReport {
        let started = Instant::now();
        let scan_id = uuid::Uuid::new_v4().to_string();
        let mut cancelled = false;

        info!("Starting scan {} of {} folder(s)", scan_id, folders.len());
        self.emit(ScanEvent::Started { scan_id: scan_id.clone(), folders: folders.to_vec() });

        // Walk each root; one inaccessible root never stops the others
        let mut discovered = Vec::new();
        let mut seen = HashSet::new();
        let mut walk_failures = Vec::new();
        for root in folders {
            let walked = tokio::select! {
                biased;
                _ = cancelled_signal(&mut cancel) => None,
                walked = self.walker.walk(root, options) => Some(walked),
            };
            match walked {
                None => {
                    cancelled = true;
                    break;
                }
                Some(Ok(files)) => {
                    info!("Walked {:?}: {} files", root, files.len());
                    self.emit(ScanEvent::RootWalked { root: root.clone(), files: files.len() });
                    // Overlapping selections must not classify a file twice
                    discovered.extend(files.into_iter().filter(|f| seen.insert(f.path.clone())));
                }
                Some(Err(e)) => {
                    warn!("Walk failed for {:?}: {}", root, e);
                    let reason = match e {
                        CuratorError::Walk { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    self.emit(ScanEvent::WalkFailed { root: root.clone(), reason: reason.clone() });
                    walk_failures.push(WalkFailure { root: root.clone(), reason });
                }
            }
        }

        let (files, skipped_known) = if cancelled {
            (discovered, 0)
        } else {
            match self.drop_cataloged(discovered, cancel.clone()).await {
                Ok(kept) => kept,
                Err(unfiltered) => {
                    info!("Cancelled while checking the catalog");
                    cancelled = true;
                    (unfiltered, 0)
                }
            }
        };
        let total = files.len();
        if total == 0 && !cancelled {
            info!("No files found");
        }
        self.set_progress(0, total);

        // Classify batch by batch; a cancelled in-flight batch is discarded
        let batches = self.batcher.partition(files);
        let batch_count = batches.len();
        let mut aggregated: Vec<ClassificationResult> = Vec::with_capacity(total);
        let mut batch_failures = Vec::new();
        let mut processed = 0;

        for (index, batch) in batches.iter().enumerate() {
            if cancelled {
                break;
            }
            debug!("Submitting batch {}/{} ({} files)", index + 1, batch_count, batch.len());
            let outcome = tokio::select! {
                biased;
                _ = cancelled_signal(&mut cancel) => None,
                outcome = self.batcher.classify(batch) => Some(outcome),
            };
            let Some(outcome) = outcome else {
                info!("Abandoning batch {}/{} on cancel", index + 1, batch_count);
                cancelled = true;
                break;
            };

            processed = (processed + batch.len()).min(total);
            match outcome {
                Ok(results) => {
                    self.emit(ScanEvent::BatchCompleted { index, batches: batch_count, results: results.len() });
                    aggregated.extend(results);
                }
                Err(e) => {
                    warn!("Batch {}/{} failed: {}", index + 1, batch_count, e);
                    self.emit(ScanEvent::BatchFailed { index, batches: batch_count, reason: e.to_string() });
                    batch_failures.push(BatchFailure { index, files: batch.len(), reason: e.to_string() });
                }
            }
            self.set_progress(processed, total);
        }

        let all_roots_failed = walk_failures.len() == folders.len();
        let all_batches_failed = batch_count > 0 && batch_failures.len() == batch_count;
        let mut status = if cancelled {
            ScanStatus::Cancelled
        } else if all_roots_failed || all_batches_failed {
            ScanStatus::Failed
        } else {
            ScanStatus::Completed
        };
        if status == ScanStatus::Failed {
            error!("Scan {} failed", scan_id);
        }

        let results = options.speed_mode.apply(aggregated);
        let plr_count = results.iter().filter(|r| r.is_plr).count();

        let mut organize_report = None;
        if let (ScanStatus::Completed, Some(target)) = (status, organize) {
            if plr_count > 0 {
                let report = self.organize_results(&results, target, cancel.clone()).await;
                if report.cancelled {
                    status = ScanStatus::Cancelled;
                }
                organize_report = Some(report);
            }
        }

        let record = ScanHistoryRecord {
            id: scan_id.clone(),
            user_id: self.user_id.clone(),
            files_found: total,
            plr_files_detected: plr_count,
            folders_scanned: folders.to_vec(),
            scan_options_snapshot: options.clone(),
            scan_duration_ms: started.elapsed().as_millis() as u64,
            status,
            batches_failed: batch_failures.len(),
            files_organized: organize_report.as_ref().map(|r| r.succeeded()).unwrap_or(0),
            organize_failures: organize_report.as_ref().map(|r| r.failed()).unwrap_or(0),
            created_at: Utc::now(),
        };
        let history_saved = match self.history.append(&record) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to record scan history: {}", e);
                false
            }
        };

        info!(
            "Scan {} {}: {} files, {} PLR, {} failed batch(es)",
            scan_id, status, total, plr_count, batch_failures.len()
        );

        ScanReport {
            scan_id,
            status,
            files_found: total,
            skipped_known,
            results,
            walk_failures,
            batch_failures,
            organize: organize_report,
            history: record,
            history_saved,
        }
    }

    async fn organize_results(
        &self,
        results: &[ClassificationResult],
        target: &OrganizeTarget,
        cancel: watch::Receiver<bool>,
    ) -> OrganizeReport {
        self.lock_run().state = ScanState::Organizing;
        let files = results.iter().filter(|r| r.is_plr).count();
        self.emit(ScanEvent::Organizing { files });

        let events = self.events.clone();
        self.organizer
            .organize_observed(results, &target.base_folder, target.action, Some(cancel), |done, result| {
                let _ = events.send(ScanEvent::FileOrganized { done, result: result.clone() });
            })
            .await
    }

    /// Split off files the catalog already holds, by destination path or content hash.
    /// Gives the files back unfiltered as `Err` when cancelled mid-check.
    async fn drop_cataloged(
        &self,
        files: Vec<FileDescriptor>,
        cancel: watch::Receiver<bool>,
    ) -> std::result::Result<(Vec<FileDescriptor>, usize), Vec<FileDescriptor>> {
        let Some(catalog) = self.catalog.clone().filter(|_| self.skip_cataloged) else {
            return Ok((files, 0));
        };
        if files.is_empty() {
            return Ok((files, 0));
        }

        let paths: Vec<PathBuf> = files.iter().map(|f| f.path.clone()).collect();
        let known = tokio::task::spawn_blocking(move || check_catalog(&catalog, &paths, &cancel)).await;

        let known = match known {
            Ok(CatalogCheck::Known(known)) => known,
            Ok(CatalogCheck::Empty) => return Ok((files, 0)),
            Ok(CatalogCheck::Cancelled) => return Err(files),
            Err(e) => {
                warn!("Catalog lookup failed, classifying everything: {}", e);
                return Ok((files, 0));
            }
        };

        let before = files.len();
        let kept: Vec<FileDescriptor> = files
            .into_iter()
            .zip(known)
            .filter_map(|(file, known)| (!known).then_some(file))
            .collect();
        let skipped = before - kept.len();
        if skipped > 0 {
            info!("Skipping {} already organized file(s)", skipped);
        }
        Ok((kept, skipped))
    }

    fn set_progress(&self, processed: usize, total: usize) {
        self.lock_run().progress = ScanProgress { processed, total };
        self.emit(ScanEvent::Progress { processed, total });
    }

    fn emit(&self, event: ScanEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn lock_run(&self) -> MutexGuard<'_, RunState> {
        lock(&self.run)
    }
}

fn lock(run: &Mutex<RunState>) -> MutexGuard<'_, RunState> {
    run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum CatalogCheck {
    Known(Vec<bool>),
    Empty,
    Cancelled,
}

/// Look up every path, checking for cancellation between files
fn check_catalog(catalog: &Catalog, paths: &[PathBuf], cancel: &watch::Receiver<bool>) -> CatalogCheck {
    match catalog.stats() {
        Ok(stats) if stats.file_count == 0 => return CatalogCheck::Empty,
        Ok(_) => {}
        Err(e) => {
            warn!("Catalog unavailable, classifying everything: {}", e);
            return CatalogCheck::Empty;
        }
    }

    let mut known = Vec::with_capacity(paths.len());
    for path in paths {
        if *cancel.borrow() {
            return CatalogCheck::Cancelled;
        }
        known.push(is_cataloged(catalog, path));
    }
    CatalogCheck::Known(known)
}

fn is_cataloged(catalog: &Catalog, path: &Path) -> bool {
    let known = catalog.contains_destination(path).and_then(|hit| {
        if hit {
            return Ok(true);
        }
        let hash = calculate_file_hash(path)?;
        catalog.contains_hash(&hash)
    });
    match known {
        Ok(known) => known,
        Err(e) => {
            debug!("Catalog check failed for {:?}: {}", path, e);
            false
        }
    }
}

/// Resolves once cancellation is requested; never resolves if the sender is gone
async fn cancelled_signal(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// A claimed scan slot, handed out by [`ScanOrchestrator::begin_scan`].
/// Resets the run state if dropped before the scan finished.
pub struct ScanTicket {
    run: Arc<Mutex<RunState>>,
    folders: Vec<PathBuf>,
    cancel: watch::Receiver<bool>,
    finished: bool,
}

impl ScanTicket {
    pub fn folders(&self) -> &[PathBuf] {
        &self.folders
    }
}

impl Drop for ScanTicket {
    fn drop(&mut self) {
        if !self.finished {
            let mut run = lock(&self.run);
            run.state = ScanState::Cancelled;
            run.cancel = None;
            warn!("Scan dropped before it finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_fraction() {
        assert_eq!(ScanProgress { processed: 0, total: 0 }.fraction(), 0.0);
        assert_eq!(ScanProgress { processed: 10, total: 25 }.fraction(), 0.4);
        assert_eq!(ScanProgress { processed: 30, total: 25 }.fraction(), 1.0);
    }

    #[test]
    fn test_active_states() {
        assert!(ScanState::Scanning.is_active());
        assert!(ScanState::Organizing.is_active());
        assert!(!ScanState::Completed.is_active());
        assert!(!ScanState::Idle.is_active());
        assert_eq!(ScanState::from(ScanStatus::Cancelled), ScanState::Cancelled);
    }

    fn cataloged(path: &Path) -> Catalog {
        let catalog = Catalog::in_memory().unwrap();
        let result = ClassificationResult {
            file_path: path.to_path_buf(),
            is_plr: true,
            confidence: 0.9,
            content_type: "ebook".to_string(),
            niche: None,
            sub_niche: None,
            license_type: "PLR".to_string(),
            quality_rating: Default::default(),
            tags: Default::default(),
            reason: String::new(),
        };
        let entry = crate::catalog::CatalogEntry::new(&result, path, "abc".to_string(), OrganizeAction::Copy);
        catalog.record(&entry).unwrap();
        catalog
    }

    #[test]
    fn test_catalog_check_skips_empty_catalog() {
        let (_tx, rx) = watch::channel(false);
        let paths = vec![PathBuf::from("/nowhere/a.pdf")];
        let check = check_catalog(&Catalog::in_memory().unwrap(), &paths, &rx);
        assert!(matches!(check, CatalogCheck::Empty));
    }

    #[test]
    fn test_catalog_check_stops_on_cancel() {
        let catalog = cataloged(Path::new("/lib/a.pdf"));
        let paths = vec![PathBuf::from("/lib/a.pdf"), PathBuf::from("/nowhere/b.pdf")];

        let (tx, rx) = watch::channel(false);
        match check_catalog(&catalog, &paths, &rx) {
            CatalogCheck::Known(known) => assert_eq!(known, vec![true, false]),
            _ => panic!("expected a full check"),
        }

        tx.send_replace(true);
        assert!(matches!(check_catalog(&catalog, &paths, &rx), CatalogCheck::Cancelled));
    }

    #[test]
    fn test_event_serialization() {
        let event = ScanEvent::Progress { processed: 10, total: 25 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "progress");
        assert_eq!(json["total"], 25);
    }
}
