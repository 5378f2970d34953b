// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! In-memory filesystem tree (drives, folders, files) with structurally
//! shared updates and an id-keyed selection set

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::{CuratorError, Result};

pub type NodeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Drive,
    Folder,
    File,
}

/// A drive, folder or file in the tree
#[derive(Debug, Clone, Serialize)]
pub struct FileSystemNode {
    pub id: NodeId,
    pub name: String,
    pub path: PathBuf,
    pub kind: NodeKind,
    /// Files only
    pub size: Option<u64>,
    /// Files only
    pub extension: Option<String>,
    pub children: Vec<Arc<FileSystemNode>>,
    /// Whether `children` reflects the directory contents
    pub children_loaded: bool,
    pub expanded: bool,
    pub selected: bool,
    pub is_plr_candidate: bool,
    pub confidence: Option<f64>,
}

impl FileSystemNode {
    pub fn new(path: &Path, kind: NodeKind) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let extension = match kind {
            NodeKind::File => path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase()),
            _ => None,
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            path: path.to_path_buf(),
            kind,
            size: None,
            extension,
            children: Vec::new(),
            children_loaded: false,
            expanded: false,
            selected: false,
            is_plr_candidate: false,
            confidence: None,
        }
    }

    pub fn file(path: &Path, size: u64) -> Self {
        Self {
            size: Some(size),
            ..Self::new(path, NodeKind::File)
        }
    }

    pub fn is_container(&self) -> bool {
        !matches!(self.kind, NodeKind::File)
    }

    /// Depth-first search below (and including) this node
    pub fn find(&self, id: &str) -> Option<&FileSystemNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    fn find_by_path(&self, path: &Path) -> Option<&FileSystemNode> {
        if self.path == path {
            return Some(self);
        }
        if !path.starts_with(&self.path) {
            return None;
        }
        self.children.iter().find_map(|c| c.find_by_path(path))
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(|c| c.count()).sum::<usize>()
    }
}

/// Rebuild the path from `node` down to `id`; untouched subtrees keep their `Arc`
fn rebuild<F>(node: &Arc<FileSystemNode>, id: &str, updater: &mut Option<F>) -> Option<Arc<FileSystemNode>>
where
    F: FnOnce(&FileSystemNode) -> FileSystemNode,
{
    if node.id == id {
        let update = updater.take()?;
        let mut replaced = update(node);
        replaced.id = node.id.clone();
        return Some(Arc::new(replaced));
    }

    for (i, child) in node.children.iter().enumerate() {
        if let Some(new_child) = rebuild(child, id, updater) {
            let mut copy = FileSystemNode::clone(node);
            copy.children[i] = new_child;
            return Some(Arc::new(copy));
        }
    }
    None
}

/// Forest of drive/folder roots; every update yields a new tree value
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileTree {
    pub roots: Vec<Arc<FileSystemNode>>,
}

impl FileTree {
    pub fn new(roots: Vec<FileSystemNode>) -> Self {
        Self {
            roots: roots.into_iter().map(Arc::new).collect(),
        }
    }

    /// Tree rooted at the host's drives
    pub fn from_system_roots() -> Self {
        Self::new(
            system_roots()
                .into_iter()
                .map(|p| FileSystemNode::new(&p, NodeKind::Drive))
                .collect(),
        )
    }

    pub fn find(&self, id: &str) -> Option<&FileSystemNode> {
        self.roots.iter().find_map(|r| r.find(id))
    }

    pub fn find_by_path(&self, path: &Path) -> Option<&FileSystemNode> {
        self.roots.iter().find_map(|r| r.find_by_path(path))
    }

    pub fn node_count(&self) -> usize {
        self.roots.iter().map(|r| r.count()).sum()
    }

    /// New tree with the node `id` replaced by `updater(node)`.
    /// Ancestors are copied, every other subtree is shared with `self`.
    /// The updater cannot change a node's id.
    pub fn update_node<F>(&self, id: &str, updater: F) -> Result<FileTree>
    where
        F: FnOnce(&FileSystemNode) -> FileSystemNode,
    {
        let mut updater = Some(updater);
        for (i, root) in self.roots.iter().enumerate() {
            if let Some(new_root) = rebuild(root, id, &mut updater) {
                let mut roots = self.roots.clone();
                roots[i] = new_root;
                return Ok(FileTree { roots });
            }
        }
        Err(CuratorError::NodeNotFound(id.to_string()))
    }

    pub fn expand(&self, id: &str) -> Result<FileTree> {
        self.set_expanded(id, true)
    }

    /// Collapse keeps loaded children for a fast re-expand
    pub fn collapse(&self, id: &str) -> Result<FileTree> {
        self.set_expanded(id, false)
    }

    fn set_expanded(&self, id: &str, expanded: bool) -> Result<FileTree> {
        self.update_node(id, |n| FileSystemNode {
            expanded: expanded && n.is_container(),
            ..n.clone()
        })
    }

    /// Collapse and drop a folder's children
    pub fn prune(&self, id: &str) -> Result<FileTree> {
        self.update_node(id, |n| FileSystemNode {
            expanded: false,
            children: Vec::new(),
            children_loaded: false,
            ..n.clone()
        })
    }

    /// Attach freshly loaded children to a folder or drive
    pub fn set_children(&self, id: &str, children: Vec<FileSystemNode>) -> Result<FileTree> {
        let node = self.find(id).ok_or_else(|| CuratorError::NodeNotFound(id.to_string()))?;
        if !node.is_container() {
            return Err(CuratorError::InvalidState(format!("{:?} is a file", node.path)));
        }
        self.update_node(id, move |n| FileSystemNode {
            children: children.into_iter().map(Arc::new).collect(),
            children_loaded: true,
            ..n.clone()
        })
    }

    /// Record a classifier verdict on the node at `path`, if it is in the tree
    pub fn mark_classified(&self, path: &Path, is_plr: bool, confidence: f64) -> Result<FileTree> {
        let id = match self.find_by_path(path) {
            Some(node) => node.id.clone(),
            None => return Ok(self.clone()),
        };
        self.update_node(&id, |n| FileSystemNode {
            is_plr_candidate: is_plr,
            confidence: Some(confidence.clamp(0.0, 1.0)),
            ..n.clone()
        })
    }
}

/// Read a directory into child nodes: folders first, then files, each by name.
/// Hidden entries are skipped.
pub fn load_children(dir: &Path) -> Result<Vec<FileSystemNode>> {
    let mut folders = Vec::new();
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)?.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let path = dir.join(&name);
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(e) => {
                debug!("Cannot read type of {:?}: {}", path, e);
                continue;
            }
        };

        if file_type.is_dir() {
            folders.push(FileSystemNode::new(&path, NodeKind::Folder));
        } else if file_type.is_file() {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            files.push(FileSystemNode::file(&path, size));
        }
    }

    folders.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    files.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    folders.extend(files);
    Ok(folders)
}

/// Mount points offered as drive nodes
pub fn system_roots() -> Vec<PathBuf> {
    #[cfg(windows)]
    {
        (b'A'..=b'Z')
            .map(|letter| PathBuf::from(format!("{}:\\", letter as char)))
            .filter(|p| p.exists())
            .collect()
    }
    #[cfg(not(windows))]
    {
        vec![PathBuf::from("/")]
    }
}

/// Set of selected node ids; toggling twice deselects
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionSet {
    ids: BTreeSet<NodeId>,
}

impl SelectionSet {
    /// Flip the node's membership; returns whether it is now selected
    pub fn toggle(&mut self, node: &FileSystemNode) -> bool {
        if self.ids.remove(&node.id) {
            false
        } else {
            self.ids.insert(node.id.clone());
            true
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.ids.remove(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.ids.iter()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}
