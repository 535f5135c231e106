// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration for NodeFS Core

use serde::{Deserialize, Serialize};

/// Platform whose error presentation and edge-case behavior the filesystem follows
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    #[default]
    Posix,
    Windows,
}

impl Platform {
    pub fn is_windows(self) -> bool {
        matches!(self, Platform::Windows)
    }

    /// Whether `c` separates path components on this platform
    pub fn is_separator(self, c: char) -> bool {
        c == '/' || (self.is_windows() && c == '\\')
    }
}

/// Permission enforcement policy
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    pub enforce_posix_permissions: bool,
    pub root_bypass_permissions: bool,
    /// Principal used when no identity manager is attached
    pub default_uid: u32,
    pub default_gid: u32,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            enforce_posix_permissions: true,
            root_bypass_permissions: true,
            default_uid: 0,
            default_gid: 0,
        }
    }
}

/// Optional features; a disabled feature fails with permission denied
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSet {
    pub symlinks: bool,
    pub hardlinks: bool,
    pub chroot: bool,
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self {
            symlinks: true,
            hardlinks: true,
            chroot: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub platform: Platform,
    /// Reject every mutating operation
    pub read_only: bool,
    pub umask: u32,
    pub max_symlink_hops: u32,
    pub security: SecurityPolicy,
    pub features: FeatureSet,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            platform: Platform::Posix,
            read_only: false,
            umask: 0o022,
            max_symlink_hops: 40,
            security: SecurityPolicy::default(),
            features: FeatureSet::default(),
        }
    }
}

impl FsConfig {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn windows() -> Self {
        Self {
            platform: Platform::Windows,
            ..Self::default()
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.umask <= 0o777 && self.max_symlink_hops > 0
    }
}
