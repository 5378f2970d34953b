// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for Curator

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Curator operations
pub type Result<T> = std::result::Result<T, CuratorError>;

/// Curator error types
#[derive(Error, Debug)]
pub enum CuratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No folder selected")]
    NoSelection,

    #[error("A scan is already in progress")]
    ScanInProgress,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Cannot walk {root:?}: {reason}")]
    Walk { root: PathBuf, reason: String },

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Organize error: {0}")]
    Organize(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Whole-batch classifier failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("rate limited by classifier")]
    RateLimited,

    #[error("classifier quota exceeded")]
    QuotaExceeded,

    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("malformed classifier response: {0}")]
    Malformed(String),

    #[error("classifier returned {got} results for {expected} files")]
    CountMismatch { expected: usize, got: usize },

    #[error("classification timed out")]
    Timeout,
}

impl ClassifierError {
    /// Whether retrying the same batch may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Unavailable(_))
    }
}
