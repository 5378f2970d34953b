// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Session-scoped state shared by the CLI/web front ends and the pipeline:
//! the folder tree, the selection, the current scan options and the last results.
//!
//! Every tree change goes through [`FileTree::update_node`] and is published
//! by swapping in the new tree, so readers never see a half-applied update.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::classifier::ClassificationResult;
use crate::options::ScanOptions;
use crate::profiles::ProfileStore;
use crate::scan::{OrganizeTarget, ScanOrchestrator, ScanReport};
use crate::tree::{load_children, FileSystemNode, FileTree, NodeKind, SelectionSet};
use crate::{CuratorError, Result};

pub struct ScanSession {
    tree: RwLock<FileTree>,
    selection: Mutex<SelectionSet>,
    options: RwLock<ScanOptions>,
    results: RwLock<Vec<ClassificationResult>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScanSession {
    pub fn new(tree: FileTree, options: ScanOptions) -> Self {
        Self {
            tree: RwLock::new(tree),
            selection: Mutex::new(SelectionSet::default()),
            options: RwLock::new(options),
            results: RwLock::new(Vec::new()),
        }
    }

    /// Session whose tree holds one folder node per path
    pub fn with_folders(folders: &[PathBuf], options: ScanOptions) -> Self {
        let roots = folders
            .iter()
            .map(|p| FileSystemNode::new(p, NodeKind::Folder))
            .collect();
        Self::new(FileTree::new(roots), options)
    }

    /// Current tree snapshot; cheap, children are shared
    pub fn tree(&self) -> FileTree {
        read(&self.tree).clone()
    }

    pub fn update_node<F>(&self, id: &str, updater: F) -> Result<()>
    where
        F: FnOnce(&FileSystemNode) -> FileSystemNode,
    {
        let mut tree = write(&self.tree);
        *tree = tree.update_node(id, updater)?;
        Ok(())
    }

    /// Expand a folder, reading its directory the first time
    pub async fn expand(&self, id: &str) -> Result<()> {
        let (path, needs_load) = {
            let tree = read(&self.tree);
            let node = tree.find(id).ok_or_else(|| CuratorError::NodeNotFound(id.to_string()))?;
            (node.path.clone(), node.is_container() && !node.children_loaded)
        };

        if needs_load {
            let dir = path.clone();
            let children = tokio::task::spawn_blocking(move || load_children(&dir))
                .await
                .map_err(|e| CuratorError::InvalidState(format!("Directory listing failed: {}", e)))??;
            debug!("Loaded {} children of {:?}", children.len(), path);

            let mut tree = write(&self.tree);
            *tree = tree.set_children(id, children)?.expand(id)?;
        } else {
            let mut tree = write(&self.tree);
            *tree = tree.expand(id)?;
        }
        Ok(())
    }

    pub fn collapse(&self, id: &str) -> Result<()> {
        let mut tree = write(&self.tree);
        *tree = tree.collapse(id)?;
        Ok(())
    }

    /// Collapse and forget the children; removed nodes leave the selection too
    pub fn prune(&self, id: &str) -> Result<()> {
        let mut tree = write(&self.tree);
        let pruned = tree.prune(id)?;
        let mut selection = lock(&self.selection);
        let gone: Vec<String> = selection
            .ids()
            .filter(|selected| pruned.find(selected).is_none())
            .cloned()
            .collect();
        for selected in gone {
            selection.remove(&selected);
        }
        *tree = pruned;
        Ok(())
    }

    /// Select or deselect a node; returns whether it is now selected
    pub fn toggle_selection(&self, id: &str) -> Result<bool> {
        let mut tree = write(&self.tree);
        let node = tree.find(id).ok_or_else(|| CuratorError::NodeNotFound(id.to_string()))?;
        let selected = lock(&self.selection).toggle(node);
        *tree = tree.update_node(id, |n| FileSystemNode { selected, ..n.clone() })?;
        Ok(selected)
    }

    pub fn selection(&self) -> SelectionSet {
        lock(&self.selection).clone()
    }

    /// Paths of the selected folders and drives, sorted
    pub fn selected_folders(&self) -> Vec<PathBuf> {
        let tree = read(&self.tree);
        let selection = lock(&self.selection);
        let mut paths: Vec<PathBuf> = selection
            .ids()
            .filter_map(|id| tree.find(id))
            .filter(|n| n.is_container())
            .map(|n| n.path.clone())
            .collect();
        paths.sort();
        paths
    }

    pub fn options(&self) -> ScanOptions {
        read(&self.options).clone()
    }

    pub fn set_options(&self, options: ScanOptions) {
        *write(&self.options) = options;
    }

    /// Replace the current options with a stored profile's snapshot
    pub fn load_profile(&self, profiles: &ProfileStore, id: &str) -> Result<ScanOptions> {
        let options = profiles.load_profile(id)?;
        self.set_options(options.clone());
        Ok(options)
    }

    pub fn results(&self) -> Vec<ClassificationResult> {
        read(&self.results).clone()
    }

    /// Keep a scan's results and flag classified files in the tree
    pub fn apply_report(&self, report: &ScanReport) -> Result<()> {
        let mut tree = write(&self.tree);
        let mut updated = tree.clone();
        for result in &report.results {
            updated = updated.mark_classified(&result.file_path, result.is_plr, result.confidence)?;
        }
        *tree = updated;
        *write(&self.results) = report.results.clone();
        Ok(())
    }

    /// Scan the selected folders with the current options, organizing into `organize` if given
    pub async fn scan(&self, orchestrator: &ScanOrchestrator, organize: Option<OrganizeTarget>) -> Result<ScanReport> {
        let folders = self.selected_folders();
        if folders.is_empty() {
            return Err(CuratorError::NoSelection);
        }
        write(&self.results).clear();
        let report = orchestrator
            .start_scan_with(&folders, &self.options(), organize)
            .await?;
        self.apply_report(&report)?;
        Ok(report)
    }

    pub fn find_by_path(&self, path: &Path) -> Option<FileSystemNode> {
        read(&self.tree).find_by_path(path).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{MaxDepth, SpeedMode};
    use crate::store::MemoryStore;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_expand_loads_children_once() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.pdf"), "a").unwrap();

        let session = ScanSession::with_folders(&[dir.path().to_path_buf()], ScanOptions::default());
        let root_id = session.tree().roots[0].id.clone();

        session.expand(&root_id).await.unwrap();
        let tree = session.tree();
        let root = tree.find(&root_id).unwrap();
        assert!(root.expanded);
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].name, "sub");

        let child_id = root.children[1].id.clone();
        session.collapse(&root_id).unwrap();
        session.expand(&root_id).await.unwrap();
        // re-expand reuses retained children
        assert!(session.tree().find(&child_id).is_some());
    }

    #[tokio::test]
    async fn test_selection_tracks_node_flag() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let session = ScanSession::with_folders(&[dir.path().to_path_buf()], ScanOptions::default());
        let root_id = session.tree().roots[0].id.clone();
        session.expand(&root_id).await.unwrap();
        let sub_id = session.tree().roots[0].children[0].id.clone();

        assert!(session.toggle_selection(&sub_id).unwrap());
        assert!(session.tree().find(&sub_id).unwrap().selected);
        assert_eq!(session.selected_folders(), vec![dir.path().join("sub")]);

        assert!(!session.toggle_selection(&sub_id).unwrap());
        assert!(!session.tree().find(&sub_id).unwrap().selected);
        assert!(session.selected_folders().is_empty());

        assert!(session.toggle_selection("missing").is_err());
    }

    #[tokio::test]
    async fn test_prune_drops_selection_below() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let session = ScanSession::with_folders(&[dir.path().to_path_buf()], ScanOptions::default());
        let root_id = session.tree().roots[0].id.clone();
        session.expand(&root_id).await.unwrap();
        let sub_id = session.tree().roots[0].children[0].id.clone();
        session.toggle_selection(&sub_id).unwrap();

        session.prune(&root_id).unwrap();
        assert!(session.selection().is_empty());
        assert!(session.tree().roots[0].children.is_empty());
    }

    #[test]
    fn test_load_profile_replaces_options() {
        let profiles = ProfileStore::new(Arc::new(MemoryStore::new()));
        let mut stored = ScanOptions::default().with_file_types(["pdf"]);
        stored.max_depth = MaxDepth::Levels(1);
        stored.speed_mode = SpeedMode::Quick;
        let profile = profiles.save_profile("narrow", &stored).unwrap();

        let session = ScanSession::new(FileTree::default(), ScanOptions::default());
        session.load_profile(&profiles, &profile.id).unwrap();
        assert_eq!(session.options(), stored);
    }
}
