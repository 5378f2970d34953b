// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Append-only scan history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::options::ScanOptions;
use crate::store::{self, KeyValueStore, HISTORY_KEY};
use crate::{CuratorError, Result};

/// Terminal status of a scan run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Completed,
    Cancelled,
    Failed,
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Summary of one scan run; never modified once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanHistoryRecord {
    pub id: String,
    pub user_id: String,
    pub files_found: usize,
    pub plr_files_detected: usize,
    pub folders_scanned: Vec<PathBuf>,
    pub scan_options_snapshot: ScanOptions,
    pub scan_duration_ms: u64,
    pub status: ScanStatus,
    #[serde(default)]
    pub batches_failed: usize,
    #[serde(default)]
    pub files_organized: usize,
    #[serde(default)]
    pub organize_failures: usize,
    pub created_at: DateTime<Utc>,
}

/// Scan history backed by one list in the key/value store.
/// Only appends and reads are offered.
pub struct ScanHistory {
    store: Arc<dyn KeyValueStore>,
    append_lock: Mutex<()>,
}

impl ScanHistory {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            append_lock: Mutex::new(()),
        }
    }

    /// Append a record; records stay ordered by creation time
    pub fn append(&self, record: &ScanHistoryRecord) -> Result<()> {
        let _guard = self
            .append_lock
            .lock()
            .map_err(|_| CuratorError::Persistence("history lock poisoned".to_string()))?;

        let mut records = self.read_all()?;
        records.push(record.clone());
        store::save(self.store.as_ref(), HISTORY_KEY, &records)?;

        info!(
            "Recorded scan {} ({}, {} files, {} PLR)",
            record.id, record.status, record.files_found, record.plr_files_detected
        );
        Ok(())
    }

    /// All records, oldest first
    pub fn read_all(&self) -> Result<Vec<ScanHistoryRecord>> {
        Ok(store::load(self.store.as_ref(), HISTORY_KEY)?.unwrap_or_default())
    }

    /// Get the most recent N records (newest first)
    pub fn get_recent(&self, count: usize) -> Result<Vec<ScanHistoryRecord>> {
        let mut records = self.read_all()?;
        records.reverse();
        records.truncate(count);
        Ok(records)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read_all()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn record(files: usize, status: ScanStatus) -> ScanHistoryRecord {
        ScanHistoryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "tester".to_string(),
            files_found: files,
            plr_files_detected: 0,
            folders_scanned: vec![PathBuf::from("/in")],
            scan_options_snapshot: ScanOptions::default(),
            scan_duration_ms: 5,
            status,
            batches_failed: 0,
            files_organized: 0,
            organize_failures: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_append_only_ordering() {
        let history = ScanHistory::new(Arc::new(MemoryStore::new()));
        assert!(history.is_empty().unwrap());

        let first = record(1, ScanStatus::Completed);
        let second = record(2, ScanStatus::Cancelled);
        let third = record(3, ScanStatus::Failed);
        for r in [&first, &second, &third] {
            history.append(r).unwrap();
        }

        assert_eq!(history.len().unwrap(), 3);
        assert_eq!(history.read_all().unwrap(), vec![first.clone(), second, third.clone()]);

        let recent = history.get_recent(2).unwrap();
        assert_eq!(recent[0], third);
        assert_eq!(recent.len(), 2);
        // earlier records are untouched by later appends
        assert_eq!(history.read_all().unwrap()[0], first);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ScanStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }
}
