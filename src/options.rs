// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Scan options, speed modes and named scan profiles

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::classifier::ClassificationResult;
use crate::CuratorError;

/// Confidence a result must exceed to survive a quick scan
pub const QUICK_CONFIDENCE_THRESHOLD: f64 = 0.9;

/// How deep below a root folder the walker may descend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MaxDepthRepr", into = "MaxDepthRepr")]
pub enum MaxDepth {
    /// At most this many directory levels below the root
    Levels(usize),
    Unlimited,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum MaxDepthRepr {
    Levels(usize),
    Word(String),
}

impl TryFrom<MaxDepthRepr> for MaxDepth {
    type Error = String;

    fn try_from(repr: MaxDepthRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            MaxDepthRepr::Levels(n) => Ok(MaxDepth::Levels(n)),
            MaxDepthRepr::Word(w) => w.parse().map_err(|e: CuratorError| e.to_string()),
        }
    }
}

impl From<MaxDepth> for MaxDepthRepr {
    fn from(depth: MaxDepth) -> Self {
        match depth {
            MaxDepth::Levels(n) => MaxDepthRepr::Levels(n),
            MaxDepth::Unlimited => MaxDepthRepr::Word("unlimited".to_string()),
        }
    }
}

impl FromStr for MaxDepth {
    type Err = CuratorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unlimited") {
            return Ok(MaxDepth::Unlimited);
        }
        s.parse::<usize>()
            .map(MaxDepth::Levels)
            .map_err(|_| CuratorError::Config(format!("Invalid max depth '{}'", s)))
    }
}

impl fmt::Display for MaxDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxDepth::Levels(n) => write!(f, "{}", n),
            MaxDepth::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// Result filtering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpeedMode {
    /// Keep only high-confidence results
    Quick,
    #[default]
    Deep,
}

impl SpeedMode {
    /// Apply the mode's filter to an aggregated result list
    pub fn apply(self, results: Vec<ClassificationResult>) -> Vec<ClassificationResult> {
        match self {
            SpeedMode::Quick => quick_filter(results),
            SpeedMode::Deep => results,
        }
    }
}

impl FromStr for SpeedMode {
    type Err = CuratorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(SpeedMode::Quick),
            "deep" => Ok(SpeedMode::Deep),
            other => Err(CuratorError::Config(format!("Unknown speed mode '{}'", other))),
        }
    }
}

/// Keep only results with confidence strictly above the quick threshold
pub fn quick_filter(results: Vec<ClassificationResult>) -> Vec<ClassificationResult> {
    results
        .into_iter()
        .filter(|r| r.confidence > QUICK_CONFIDENCE_THRESHOLD)
        .collect()
}

/// Parameters of a single scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanOptions {
    #[serde(default = "default_true")]
    pub include_subfolders: bool,
    #[serde(default = "default_max_depth")]
    pub max_depth: MaxDepth,
    /// Lowercase extensions without the leading dot; empty means every type
    #[serde(default)]
    pub file_type_filter: BTreeSet<String>,
    #[serde(default)]
    pub speed_mode: SpeedMode,
}

fn default_true() -> bool { true }
fn default_max_depth() -> MaxDepth { MaxDepth::Unlimited }

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            include_subfolders: true,
            max_depth: MaxDepth::Unlimited,
            file_type_filter: default_plr_types(),
            speed_mode: SpeedMode::Deep,
        }
    }
}

/// File types PLR packages usually ship as
pub fn default_plr_types() -> BTreeSet<String> {
    ["pdf", "doc", "docx", "txt", "rtf", "zip", "rar", "7z", "epub", "mp3", "mp4", "html"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl ScanOptions {
    /// Replace the file type filter, normalizing each extension
    pub fn with_file_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.file_type_filter = types
            .into_iter()
            .filter_map(|t| normalize_extension(t.as_ref()))
            .collect();
        self
    }

    /// Whether an extension passes the type filter
    pub fn accepts_extension(&self, ext: &str) -> bool {
        if self.file_type_filter.is_empty() {
            return true;
        }
        normalize_extension(ext)
            .map(|e| self.file_type_filter.contains(&e))
            .unwrap_or(false)
    }
}

/// Lowercase an extension and strip leading dots
pub fn normalize_extension(ext: &str) -> Option<String> {
    let ext = ext.trim().trim_start_matches('.').to_lowercase();
    if ext.is_empty() { None } else { Some(ext) }
}

/// A named, persisted snapshot of scan options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanProfile {
    pub id: String,
    pub name: String,
    pub options: ScanOptions,
    pub created_at: DateTime<Utc>,
}

impl ScanProfile {
    pub fn new(name: impl Into<String>, options: ScanOptions) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            options,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::QualityRating;

    fn result(path: &str, confidence: f64) -> ClassificationResult {
        ClassificationResult {
            file_path: path.into(),
            is_plr: true,
            confidence,
            content_type: "ebook".to_string(),
            niche: Some("Health".to_string()),
            sub_niche: None,
            license_type: "PLR".to_string(),
            quality_rating: QualityRating::B,
            tags: Default::default(),
            reason: String::new(),
        }
    }

    #[test]
    fn test_quick_filter_is_strict_and_idempotent() {
        let results = vec![result("a", 0.95), result("b", 0.9), result("c", 0.5), result("d", 0.91)];
        let once = quick_filter(results);
        let paths: Vec<_> = once.iter().map(|r| r.file_path.to_string_lossy().to_string()).collect();
        assert_eq!(paths, vec!["a", "d"]);

        let twice = quick_filter(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_deep_mode_keeps_everything() {
        let results = vec![result("a", 0.1), result("b", 0.99)];
        assert_eq!(SpeedMode::Deep.apply(results.clone()), results);
    }

    #[test]
    fn test_max_depth_serde() {
        let unlimited = serde_json::to_string(&MaxDepth::Unlimited).unwrap();
        assert_eq!(unlimited, "\"unlimited\"");
        let levels: MaxDepth = serde_json::from_str("3").unwrap();
        assert_eq!(levels, MaxDepth::Levels(3));
        let word: MaxDepth = serde_json::from_str("\"Unlimited\"").unwrap();
        assert_eq!(word, MaxDepth::Unlimited);
        assert!(serde_json::from_str::<MaxDepth>("\"deep\"").is_err());
    }

    #[test]
    fn test_file_type_filter_normalizes() {
        let options = ScanOptions::default().with_file_types([".PDF", "zip", "  "]);
        assert_eq!(options.file_type_filter.len(), 2);
        assert!(options.accepts_extension("pdf"));
        assert!(options.accepts_extension(".Zip"));
        assert!(!options.accepts_extension("exe"));

        let all = ScanOptions::default().with_file_types(Vec::<String>::new());
        assert!(all.accepts_extension("exe"));
    }
}
