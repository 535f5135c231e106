// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Path traversal with bounded symlink dereferencing

use std::collections::VecDeque;

use crate::config::{Platform, SecurityPolicy};
use crate::error::{FsErrorKind, KindResult};
use crate::identity::User;
use crate::node::NodeStore;
use crate::permissions::{self, Access};
use crate::types::NodeId;

/// Node reached by a walk together with the entry that named it
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Resolved {
    pub node: NodeId,
    /// `None` only for the view root
    pub parent: Option<(NodeId, String)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Lookup {
    Found(Resolved),
    /// Every component but the last exists; `name` can be created in `parent`
    Missing { parent: NodeId, name: String },
}

pub(crate) struct PathWalker<'a> {
    pub store: &'a NodeStore,
    pub root: NodeId,
    pub cwd: NodeId,
    pub user: &'a User,
    pub policy: &'a SecurityPolicy,
    pub platform: Platform,
    pub max_hops: u32,
}

impl PathWalker<'_> {
    pub fn resolve(&self, path: &str, follow_final: bool) -> KindResult<Resolved> {
        match self.lookup(path, follow_final)? {
            Lookup::Found(resolved) => Ok(resolved),
            Lookup::Missing { .. } => Err(FsErrorKind::NotFound),
        }
    }

    pub fn lookup(&self, path: &str, follow_final: bool) -> KindResult<Lookup> {
        let mut queue = WorkQueue::from_path(path, self.platform);
        let mut current = self.cwd;
        let mut parent: Option<(NodeId, String)> = None;
        let mut hops = 0u32;

        while let Some(component) = queue.pop_front() {
            match component {
                WorkComponent::RootDir => {
                    current = self.root;
                    parent = None;
                }
                WorkComponent::CurDir => {
                    if !self.store.get(current)?.is_dir() {
                        return Err(FsErrorKind::NotADirectory);
                    }
                }
                WorkComponent::ParentDir => {
                    if !self.store.get(current)?.is_dir() {
                        return Err(FsErrorKind::NotADirectory);
                    }
                    if current != self.root {
                        current = self.store.parent_of(current);
                    }
                    parent = None;
                }
                WorkComponent::Normal(name) => {
                    let is_final = queue.is_empty();
                    let dir = self.store.get(current)?;
                    let children = dir.children().ok_or(FsErrorKind::NotADirectory)?;
                    if !permissions::allowed(self.policy, dir.owner(), self.user, Access::EXEC) {
                        return Err(FsErrorKind::PermissionDenied);
                    }

                    let Some(&child_id) = children.get(&name) else {
                        if is_final {
                            return Ok(Lookup::Missing {
                                parent: current,
                                name,
                            });
                        }
                        return Err(FsErrorKind::NotFound);
                    };

                    let child = self.store.get(child_id)?;
                    if let Some(target) = child.symlink_target() {
                        if !is_final || follow_final {
                            hops += 1;
                            if hops > self.max_hops {
                                return Err(FsErrorKind::TooManyLinks);
                            }
                            queue.inject_symlink(target, self.platform);
                            continue;
                        }
                    }

                    parent = Some((current, name));
                    current = child_id;
                }
            }
        }

        if parent.is_none() && current != self.root {
            // Walk ended on "." or ".."; name the directory through its parent entry
            parent = self.store.entry_of(current);
        }
        Ok(Lookup::Found(Resolved {
            node: current,
            parent,
        }))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum WorkComponent {
    RootDir,
    CurDir,
    ParentDir,
    Normal(String),
}

struct WorkQueue {
    items: VecDeque<WorkComponent>,
}

impl WorkQueue {
    fn from_path(path: &str, platform: Platform) -> Self {
        Self {
            items: components(path, platform),
        }
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn pop_front(&mut self) -> Option<WorkComponent> {
        self.items.pop_front()
    }

    /// Replace the symlink component with its target, ahead of the remaining walk
    fn inject_symlink(&mut self, target: &str, platform: Platform) {
        let mut next = components(target, platform);
        next.append(&mut self.items);
        self.items = next;
    }
}

fn components(path: &str, platform: Platform) -> VecDeque<WorkComponent> {
    let mut items = VecDeque::new();
    if path.starts_with(|c: char| platform.is_separator(c)) {
        items.push_back(WorkComponent::RootDir);
    }
    for part in path.split(|c: char| platform.is_separator(c)) {
        match part {
            "" => {}
            "." => items.push_back(WorkComponent::CurDir),
            ".." => items.push_back(WorkComponent::ParentDir),
            name => items.push_back(WorkComponent::Normal(name.to_string())),
        }
    }
    items
}
