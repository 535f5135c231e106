// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! NodeFS Core - In-memory POSIX-style filesystem engine
//!
//! This crate provides a virtual filesystem held entirely in memory: a node
//! tree with hard links and symlinks, open handles with delete-on-last-close,
//! Unix permission checks with umask, and error reporting in either POSIX or
//! Windows presentation.

pub mod config;
pub mod error;
pub mod file;
pub mod identity;
pub mod interface;
pub mod permissions;
pub mod readonly;
pub mod types;
pub mod vfs;
pub mod walk;

mod handle;
mod node;
mod path;
mod resolver;

// Re-export key types
pub use config::{FeatureSet, FsConfig, Platform, SecurityPolicy};
pub use error::{FsError, FsErrorKind, FsResult};
pub use file::File;
pub use identity::{Group, IdentityManager, MemIdentity, User};
pub use interface::{FileHandle, Filesystem};
pub use permissions::Umask;
pub use readonly::{ReadOnlyFile, ReadOnlyFs};
pub use types::{
    Capabilities, DirEntry, FileTimes, FileType, HandleId, Metadata, OpenOptions, Whence,
};
pub use vfs::{FsStats, MemFs, MemFsBuilder};
pub use walk::WalkAction;
