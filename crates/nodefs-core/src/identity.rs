// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Users, groups and the identity manager collaborator

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{FsError, FsErrorKind, FsResult};

/// User represents the security identity of a caller (uid, gid, and groups)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub groups: Vec<u32>,
}

impl User {
    pub fn new(name: impl Into<String>, uid: u32, gid: u32) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
            groups: Vec::new(),
        }
    }

    pub fn root() -> Self {
        Self::new("root", 0, 0)
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0
    }

    pub fn in_group(&self, gid: u32) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub gid: u32,
}

/// Supplies the calling principal and user/group lookups.
///
/// The filesystem reads the current user to stamp ownership on new nodes and
/// to feed permission checks. It never manages users itself.
#[cfg_attr(test, mockall::automock)]
pub trait IdentityManager: Send + Sync {
    fn current_user(&self) -> User;

    fn lookup_user(&self, name: &str) -> FsResult<User>;

    fn lookup_group(&self, name: &str) -> FsResult<Group>;
}

#[derive(Debug)]
struct IdentityState {
    users: HashMap<String, User>,
    groups: HashMap<String, Group>,
    current: User,
}

/// In-memory identity manager with a switchable current user
#[derive(Debug)]
pub struct MemIdentity {
    state: Mutex<IdentityState>,
}

impl Default for MemIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl MemIdentity {
    /// Starts with `root` (uid 0, gid 0) as the only user and group
    pub fn new() -> Self {
        let root = User::root();
        let mut users = HashMap::new();
        users.insert(root.name.clone(), root.clone());
        let mut groups = HashMap::new();
        groups.insert(
            "root".to_string(),
            Group {
                name: "root".to_string(),
                gid: 0,
            },
        );
        Self {
            state: Mutex::new(IdentityState {
                users,
                groups,
                current: root,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, IdentityState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_group(&self, name: &str, gid: u32) -> FsResult<Group> {
        let mut state = self.state();
        if state.groups.contains_key(name) || state.groups.values().any(|g| g.gid == gid) {
            return Err(FsError::path("addgroup", name, FsErrorKind::AlreadyExists));
        }
        let group = Group {
            name: name.to_string(),
            gid,
        };
        state.groups.insert(name.to_string(), group.clone());
        Ok(group)
    }

    /// Adds a user whose primary group must already exist
    pub fn add_user(&self, name: &str, uid: u32, group_name: &str) -> FsResult<User> {
        let mut state = self.state();
        if state.users.contains_key(name) || state.users.values().any(|u| u.uid == uid) {
            return Err(FsError::path("adduser", name, FsErrorKind::AlreadyExists));
        }
        let gid = state
            .groups
            .get(group_name)
            .map(|g| g.gid)
            .ok_or_else(|| FsError::path("adduser", group_name, FsErrorKind::NotFound))?;
        let user = User::new(name, uid, gid);
        state.users.insert(name.to_string(), user.clone());
        Ok(user)
    }

    /// Adds a supplementary group to an existing user
    pub fn add_user_to_group(&self, user_name: &str, group_name: &str) -> FsResult<()> {
        let mut state = self.state();
        let gid = state
            .groups
            .get(group_name)
            .map(|g| g.gid)
            .ok_or_else(|| FsError::path("usermod", group_name, FsErrorKind::NotFound))?;
        let user = state
            .users
            .get_mut(user_name)
            .ok_or_else(|| FsError::path("usermod", user_name, FsErrorKind::NotFound))?;
        if !user.groups.contains(&gid) {
            user.groups.push(gid);
        }
        let updated = user.clone();
        if state.current.name == user_name {
            state.current = updated;
        }
        Ok(())
    }

    /// Switches the current principal
    pub fn set_user(&self, name: &str) -> FsResult<User> {
        let mut state = self.state();
        let user = state
            .users
            .get(name)
            .cloned()
            .ok_or_else(|| FsError::path("setuser", name, FsErrorKind::NotFound))?;
        state.current = user.clone();
        Ok(user)
    }
}

impl IdentityManager for MemIdentity {
    fn current_user(&self) -> User {
        self.state().current.clone()
    }

    fn lookup_user(&self, name: &str) -> FsResult<User> {
        self.state()
            .users
            .get(name)
            .cloned()
            .ok_or_else(|| FsError::path("lookupuser", name, FsErrorKind::NotFound))
    }

    fn lookup_group(&self, name: &str) -> FsResult<Group> {
        self.state()
            .groups
            .get(name)
            .cloned()
            .ok_or_else(|| FsError::path("lookupgroup", name, FsErrorKind::NotFound))
    }
}
