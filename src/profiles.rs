// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Scan profiles and user preferences

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::options::{ScanOptions, ScanProfile};
use crate::store::{self, KeyValueStore, PROFILES_KEY, THEME_KEY};
use crate::{CuratorError, Result};

/// Named scan option snapshots, persisted as one list
pub struct ProfileStore {
    store: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl ProfileStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn list(&self) -> Result<Vec<ScanProfile>> {
        Ok(store::load(self.store.as_ref(), PROFILES_KEY)?.unwrap_or_default())
    }

    pub fn get(&self, id: &str) -> Result<Option<ScanProfile>> {
        Ok(self.list()?.into_iter().find(|p| p.id == id))
    }

    /// Snapshot `options` under a new profile id and persist the full list
    pub fn save_profile(&self, name: &str, options: &ScanOptions) -> Result<ScanProfile> {
        let _guard = self.lock()?;
        let profile = ScanProfile::new(name, options.clone());
        let mut profiles = self.list()?;
        profiles.push(profile.clone());
        store::save(self.store.as_ref(), PROFILES_KEY, &profiles)?;
        info!("Saved scan profile '{}' ({})", profile.name, profile.id);
        Ok(profile)
    }

    /// Replace a profile wholesale; profiles have no partial updates
    pub fn replace(&self, profile: ScanProfile) -> Result<()> {
        let _guard = self.lock()?;
        let mut profiles = self.list()?;
        let slot = profiles
            .iter_mut()
            .find(|p| p.id == profile.id)
            .ok_or_else(|| CuratorError::Config(format!("No profile with id {}", profile.id)))?;
        *slot = profile;
        store::save(self.store.as_ref(), PROFILES_KEY, &profiles)
    }

    /// The stored snapshot, to be used in place of the current options
    pub fn load_profile(&self, id: &str) -> Result<ScanOptions> {
        self.get(id)?
            .map(|p| p.options)
            .ok_or_else(|| CuratorError::Config(format!("No profile with id {}", id)))
    }

    /// Remove by id; returns whether anything was removed
    pub fn delete_profile(&self, id: &str) -> Result<bool> {
        let _guard = self.lock()?;
        let mut profiles = self.list()?;
        let before = profiles.len();
        profiles.retain(|p| p.id != id);
        if profiles.len() == before {
            return Ok(false);
        }
        store::save(self.store.as_ref(), PROFILES_KEY, &profiles)?;
        Ok(true)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| CuratorError::Persistence("profile lock poisoned".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

/// User preferences kept alongside profiles
pub struct Preferences {
    store: Arc<dyn KeyValueStore>,
}

impl Preferences {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn theme(&self) -> Result<Theme> {
        Ok(store::load(self.store.as_ref(), THEME_KEY)?.unwrap_or_default())
    }

    pub fn set_theme(&self, theme: Theme) -> Result<()> {
        store::save(self.store.as_ref(), THEME_KEY, &theme)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{MaxDepth, SpeedMode};
    use crate::store::MemoryStore;

    fn profiles() -> ProfileStore {
        ProfileStore::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_save_load_delete() {
        let store = profiles();
        let mut options = ScanOptions::default();
        options.max_depth = MaxDepth::Levels(2);
        options.speed_mode = SpeedMode::Quick;

        let first = store.save_profile("shallow", &options).unwrap();
        let second = store.save_profile("default", &ScanOptions::default()).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(store.list().unwrap().len(), 2);

        assert_eq!(store.load_profile(&first.id).unwrap(), options);

        assert!(store.delete_profile(&first.id).unwrap());
        assert!(!store.delete_profile(&first.id).unwrap());
        assert_eq!(store.list().unwrap(), vec![second]);
    }

    #[test]
    fn test_load_unknown_profile_fails() {
        assert!(profiles().load_profile("missing").is_err());
    }

    #[test]
    fn test_replace_is_whole_snapshot() {
        let store = profiles();
        let mut profile = store.save_profile("p", &ScanOptions::default()).unwrap();
        profile.name = "renamed".to_string();
        profile.options.include_subfolders = false;
        store.replace(profile.clone()).unwrap();
        assert_eq!(store.get(&profile.id).unwrap(), Some(profile));
    }

    #[test]
    fn test_theme_defaults_to_system() {
        let prefs = Preferences::new(Arc::new(MemoryStore::new()));
        assert_eq!(prefs.theme().unwrap(), Theme::System);
        prefs.set_theme(Theme::Dark).unwrap();
        assert_eq!(prefs.theme().unwrap(), Theme::Dark);
    }
}
