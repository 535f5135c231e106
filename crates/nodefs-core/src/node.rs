// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Node arena: directories, regular files and symlinks keyed by stable ids

use std::collections::HashMap;
use std::time::SystemTime;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{FsErrorKind, KindResult};
use crate::permissions::Owner;
use crate::types::{FileTimes, FileType, Metadata, NodeId};

/// Filesystem node types
#[derive(Clone, Debug)]
pub(crate) enum NodeKind {
    File {
        data: Vec<u8>,
    },
    Directory {
        /// Entries in insertion order
        children: IndexMap<String, NodeId>,
        /// Physical parent; the root points at itself
        parent: NodeId,
    },
    Symlink {
        target: String,
    },
}

impl NodeKind {
    pub fn directory(parent: NodeId) -> Self {
        NodeKind::Directory {
            children: IndexMap::new(),
            parent,
        }
    }
}

/// Filesystem node
#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub(crate) id: NodeId,
    pub kind: NodeKind,
    pub times: FileTimes,
    pub perm: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    /// Open handles bound to this node
    pub open_count: u32,
}

impl Node {
    pub fn file_type(&self) -> FileType {
        match self.kind {
            NodeKind::File { .. } => FileType::File,
            NodeKind::Directory { .. } => FileType::Dir,
            NodeKind::Symlink { .. } => FileType::Symlink,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn len(&self) -> u64 {
        match &self.kind {
            NodeKind::File { data } => data.len() as u64,
            NodeKind::Directory { children, .. } => children.len() as u64,
            NodeKind::Symlink { target } => target.len() as u64,
        }
    }

    pub fn owner(&self) -> Owner {
        Owner {
            uid: self.uid,
            gid: self.gid,
            perm: self.perm,
        }
    }

    pub fn children(&self) -> Option<&IndexMap<String, NodeId>> {
        match &self.kind {
            NodeKind::Directory { children, .. } => Some(children),
            _ => None,
        }
    }

    pub fn symlink_target(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Symlink { target } => Some(target),
            _ => None,
        }
    }

    /// Content changed: bump mtime and ctime
    pub fn touch_modified(&mut self) {
        let now = SystemTime::now();
        self.times.mtime = now;
        self.times.ctime = now;
    }

    pub fn touch_changed(&mut self) {
        self.times.ctime = SystemTime::now();
    }

    pub fn metadata(&self, name: &str) -> Metadata {
        Metadata {
            name: name.to_string(),
            file_type: self.file_type(),
            perm: self.perm,
            len: self.len(),
            uid: self.uid,
            gid: self.gid,
            nlink: self.nlink,
            ino: self.id.0,
            times: self.times,
        }
    }
}

/// Owns every node; directory entries refer to nodes by id only
#[derive(Debug)]
pub(crate) struct NodeStore {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
    root: NodeId,
}

impl NodeStore {
    pub fn new(perm: u32, uid: u32, gid: u32) -> Self {
        let root = NodeId(1);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node {
                id: root,
                kind: NodeKind::directory(root),
                times: FileTimes::now(),
                perm: perm & 0o7777,
                uid,
                gid,
                nlink: 2,
                open_count: 0,
            },
        );
        Self {
            nodes,
            next_id: 2,
            root,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, id: NodeId) -> KindResult<&Node> {
        self.nodes.get(&id).ok_or(FsErrorKind::NotFound)
    }

    pub fn get_mut(&mut self, id: NodeId) -> KindResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(FsErrorKind::NotFound)
    }

    #[cfg(test)]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Allocate a detached node; it becomes reachable through `link_child`
    pub fn allocate(&mut self, kind: NodeKind, perm: u32, uid: u32, gid: u32) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        // A directory counts its own "." entry
        let nlink = if matches!(kind, NodeKind::Directory { .. }) { 1 } else { 0 };
        self.nodes.insert(
            id,
            Node {
                id,
                kind,
                times: FileTimes::now(),
                perm: perm & 0o7777,
                uid,
                gid,
                nlink,
                open_count: 0,
            },
        );
        id
    }

    #[cfg(test)]
    pub fn allocate_dir(&mut self, parent: NodeId, perm: u32, uid: u32, gid: u32) -> NodeId {
        self.allocate(NodeKind::directory(parent), perm, uid, gid)
    }

    /// Drop a node that was allocated but never linked
    pub fn discard(&mut self, id: NodeId) {
        if id != self.root {
            self.nodes.remove(&id);
        }
    }

    pub fn child(&self, dir: NodeId, name: &str) -> KindResult<Option<NodeId>> {
        let node = self.get(dir)?;
        let children = node.children().ok_or(FsErrorKind::NotADirectory)?;
        Ok(children.get(name).copied())
    }

    pub fn parent_of(&self, dir: NodeId) -> NodeId {
        match self.nodes.get(&dir).map(|n| &n.kind) {
            Some(NodeKind::Directory { parent, .. }) => *parent,
            _ => dir,
        }
    }

    /// Parent directory and entry name of a non-root directory
    pub fn entry_of(&self, dir: NodeId) -> Option<(NodeId, String)> {
        if dir == self.root {
            return None;
        }
        let parent = self.parent_of(dir);
        let children = self.nodes.get(&parent)?.children()?;
        children
            .iter()
            .find(|(_, id)| **id == dir)
            .map(|(name, _)| (parent, name.clone()))
    }

    pub fn link_child(&mut self, parent: NodeId, name: &str, child: NodeId) -> KindResult<()> {
        let child_is_dir = self.get(child)?.is_dir();
        {
            let parent_node = self.get_mut(parent)?;
            match &mut parent_node.kind {
                NodeKind::Directory { children, .. } => {
                    if children.contains_key(name) {
                        return Err(FsErrorKind::AlreadyExists);
                    }
                    children.insert(name.to_string(), child);
                }
                _ => return Err(FsErrorKind::NotADirectory),
            }
            parent_node.touch_modified();
            if child_is_dir {
                parent_node.nlink = parent_node.nlink.saturating_add(1);
            }
        }

        let child_node = self.get_mut(child)?;
        child_node.nlink = child_node.nlink.saturating_add(1);
        child_node.touch_changed();
        if let NodeKind::Directory { parent: p, .. } = &mut child_node.kind {
            *p = parent;
        }
        Ok(())
    }

    /// Remove an entry and drop the link it held; reclaims the node when unused
    pub fn unlink_child(&mut self, parent: NodeId, name: &str) -> KindResult<NodeId> {
        let child = {
            let parent_node = self.get_mut(parent)?;
            let child = match &mut parent_node.kind {
                NodeKind::Directory { children, .. } => {
                    children.shift_remove(name).ok_or(FsErrorKind::NotFound)?
                }
                _ => return Err(FsErrorKind::NotADirectory),
            };
            parent_node.touch_modified();
            child
        };

        let child_is_dir = self.get(child)?.is_dir();
        if child_is_dir {
            if let Ok(parent_node) = self.get_mut(parent) {
                parent_node.nlink = parent_node.nlink.saturating_sub(1);
            }
        }
        if let Ok(child_node) = self.get_mut(child) {
            child_node.nlink = if child_is_dir {
                0
            } else {
                child_node.nlink.saturating_sub(1)
            };
            child_node.touch_changed();
        }
        self.reclaim(child);
        Ok(child)
    }

    /// Move an entry between directories without touching the child's link count.
    /// The destination name must be free.
    pub fn move_entry(
        &mut self,
        src_parent: NodeId,
        src_name: &str,
        dst_parent: NodeId,
        dst_name: &str,
    ) -> KindResult<()> {
        if self.child(dst_parent, dst_name)?.is_some() {
            return Err(FsErrorKind::AlreadyExists);
        }
        let child = {
            let parent_node = self.get_mut(src_parent)?;
            let child = match &mut parent_node.kind {
                NodeKind::Directory { children, .. } => {
                    children.shift_remove(src_name).ok_or(FsErrorKind::NotFound)?
                }
                _ => return Err(FsErrorKind::NotADirectory),
            };
            parent_node.touch_modified();
            child
        };
        let child_is_dir = self.get(child)?.is_dir();
        if child_is_dir {
            let parent_node = self.get_mut(src_parent)?;
            parent_node.nlink = parent_node.nlink.saturating_sub(1);
        }

        {
            let parent_node = self.get_mut(dst_parent)?;
            if let NodeKind::Directory { children, .. } = &mut parent_node.kind {
                children.insert(dst_name.to_string(), child);
            }
            parent_node.touch_modified();
            if child_is_dir {
                parent_node.nlink = parent_node.nlink.saturating_add(1);
            }
        }

        let child_node = self.get_mut(child)?;
        child_node.touch_changed();
        if let NodeKind::Directory { parent, .. } = &mut child_node.kind {
            *parent = dst_parent;
        }
        Ok(())
    }

    /// Free a node once no entry and no handle refers to it
    pub fn reclaim(&mut self, id: NodeId) -> bool {
        let unused = self
            .nodes
            .get(&id)
            .map(|n| n.nlink == 0 && n.open_count == 0)
            .unwrap_or(false);
        if unused && id != self.root {
            self.nodes.remove(&id);
            debug!(node = id.0, "reclaimed node");
            return true;
        }
        false
    }

    pub fn open_ref(&mut self, id: NodeId) -> KindResult<()> {
        let node = self.get_mut(id)?;
        node.open_count = node.open_count.saturating_add(1);
        Ok(())
    }

    pub fn close_ref(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.open_count = node.open_count.saturating_sub(1);
        }
        self.reclaim(id);
    }

    /// Whether `node` is `ancestor` or lies below it
    pub fn is_within(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = node;
        loop {
            if current == ancestor {
                return true;
            }
            let parent = self.parent_of(current);
            if parent == current {
                return false;
            }
            current = parent;
        }
    }

    /// Absolute path of a directory as seen from `root`
    pub fn path_of(&self, dir: NodeId, root: NodeId) -> Option<String> {
        let mut components = Vec::new();
        let mut current = dir;
        while current != root {
            let (parent, name) = self.entry_of(current)?;
            components.push(name);
            current = parent;
        }
        components.reverse();
        Some(format!("/{}", components.join("/")))
    }
}
