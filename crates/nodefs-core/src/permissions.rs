// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Owner/group/other permission checks and the creation umask

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::SecurityPolicy;
use crate::identity::User;

/// Requested access, as `rwx` bits in the "other" position
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Access(u32);

impl Access {
    pub const READ: Access = Access(0o4);
    pub const WRITE: Access = Access(0o2);
    pub const EXEC: Access = Access(0o1);

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for Access {
    type Output = Access;

    fn bitor(self, rhs: Access) -> Access {
        Access(self.0 | rhs.0)
    }
}

/// Ownership and permission bits of the node being checked
#[derive(Clone, Copy, Debug)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
    pub perm: u32,
}

pub fn allowed(policy: &SecurityPolicy, owner: Owner, user: &User, want: Access) -> bool {
    if !policy.enforce_posix_permissions {
        return true;
    }
    if policy.root_bypass_permissions && user.is_root() {
        return true;
    }

    let shift = if user.uid == owner.uid {
        6
    } else if user.in_group(owner.gid) {
        3
    } else {
        0
    };
    let granted = (owner.perm >> shift) & 0o7;
    granted & want.bits() == want.bits()
}

/// Whether `user` may change metadata (mode, owner, times) of a node it does not own
pub fn may_change_metadata(policy: &SecurityPolicy, owner: Owner, user: &User) -> bool {
    !policy.enforce_posix_permissions
        || (policy.root_bypass_permissions && user.is_root())
        || user.uid == owner.uid
}

/// Creation mask shared by every view that holds a clone
#[derive(Clone, Debug)]
pub struct Umask(Arc<AtomicU32>);

impl Umask {
    pub fn new(mask: u32) -> Self {
        Self(Arc::new(AtomicU32::new(mask & 0o777)))
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, mask: u32) {
        self.0.store(mask & 0o777, Ordering::SeqCst);
    }

    /// Clear the masked bits from a requested creation mode
    pub fn apply(&self, mode: u32) -> u32 {
        mode & 0o7777 & !self.get()
    }
}
