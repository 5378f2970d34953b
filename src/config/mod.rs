// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Curator

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::options::ScanOptions;
use crate::organize::OrganizeAction;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Identity recorded in scan history
    #[serde(default = "default_user_id")]
    pub user_id: String,

    /// Classifier engine configuration
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Scan pipeline settings
    #[serde(default)]
    pub scan: ScanConfig,

    /// Organize engine settings
    #[serde(default)]
    pub organize: OrganizeConfig,

    /// Persistence locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Web API settings
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_prompt")]
    pub prompt: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScanConfig {
    /// Files per classifier request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_timeout")]
    pub batch_timeout_secs: u64,
    /// Options used when no profile is loaded
    #[serde(default)]
    pub defaults: ScanOptions,
    /// Glob patterns the walker never descends into
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    /// Drop files already present in the catalog before classifying
    #[serde(default = "default_true")]
    pub skip_cataloged: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OrganizeConfig {
    #[serde(default)]
    pub base_folder: Option<PathBuf>,
    #[serde(default)]
    pub action: OrganizeAction,
    #[serde(default)]
    pub auto_organize: bool,
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// JSON key/value store for profiles, preferences and history
    #[serde(default = "default_store_path")]
    pub store_path: String,
    /// SQLite catalog of organized files
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

// Default value functions
fn default_user_id() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "local".to_string())
}
fn default_url() -> String { "http://localhost:11434/api/generate".to_string() }
fn default_model() -> String { "llama3.2:3b".to_string() }
fn default_timeout() -> u64 { 120 }
fn default_retries() -> u32 { 3 }
fn default_batch_size() -> usize { 10 }
fn default_batch_timeout() -> u64 { 180 }
fn default_action_timeout() -> u64 { 60 }
fn default_true() -> bool { true }
fn default_store_path() -> String { "curator_store.json".to_string() }
fn default_catalog_path() -> String { "curator_catalog.db".to_string() }
fn default_web_host() -> String { "127.0.0.1".to_string() }
fn default_web_port() -> u16 { 8080 }

fn default_prompt() -> String {
    "You classify files that may be Private Label Rights (PLR) content packages. \
     For each file below decide whether it is PLR content and answer with a JSON object \
     {\"results\": [...]} holding exactly one entry per file, in the same order. \
     Each entry has: isPlr (bool), confidence (0.0-1.0), contentType, niche, subNiche, \
     licenseType (PLR, MRR, RR, PUO or unknown), qualityRating (A, B, C or D), \
     tags (list of strings) and reason (one sentence). Return ONLY the JSON."
        .to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            classifier: ClassifierConfig::default(),
            scan: ScanConfig::default(),
            organize: OrganizeConfig::default(),
            storage: StorageConfig::default(),
            web: WebConfig::default(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            model: default_model(),
            timeout_secs: default_timeout(),
            retries: default_retries(),
            prompt: default_prompt(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_timeout_secs: default_batch_timeout(),
            defaults: ScanOptions::default(),
            ignore_patterns: vec!["**/node_modules".to_string(), "**/.git".to_string()],
            skip_cataloged: true,
        }
    }
}

impl Default for OrganizeConfig {
    fn default() -> Self {
        Self {
            base_folder: None,
            action: OrganizeAction::Copy,
            auto_organize: false,
            action_timeout_secs: default_action_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            catalog_path: default_catalog_path(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
        }
    }
}

impl ScanConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }
}

impl OrganizeConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::CuratorError::Config(format!("Failed to parse config: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.scan.batch_size == 0 {
            return Err(crate::CuratorError::Config("scan.batch_size must be at least 1".to_string()));
        }
        if self.scan.batch_timeout_secs == 0 || self.organize.action_timeout_secs == 0 {
            return Err(crate::CuratorError::Config("timeouts must be at least 1 second".to_string()));
        }
        if let Some(base) = &self.organize.base_folder {
            if !base.is_absolute() {
                return Err(crate::CuratorError::Config(format!(
                    "organize.base_folder must be absolute: {:?}",
                    base
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"scan": {"batch_size": 4}}"#).unwrap();
        assert_eq!(config.scan.batch_size, 4);
        assert_eq!(config.classifier.retries, 3);
        assert!(config.scan.skip_cataloged);
        assert_eq!(config.organize.action, OrganizeAction::Copy);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("curator.json");
        let mut config = AppConfig::default();
        config.user_id = "tester".to_string();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.user_id, "tester");
        assert_eq!(loaded.scan.batch_size, 10);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.web.port, 8080);
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = AppConfig::default();
        config.scan.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.organize.base_folder = Some(PathBuf::from("relative/lib"));
        assert!(config.validate().is_err());
    }
}
