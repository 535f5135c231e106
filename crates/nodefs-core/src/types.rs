// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for NodeFS

use std::time::SystemTime;

/// Opaque handle identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

impl HandleId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Internal node ID for filesystem nodes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct NodeId(pub(crate) u64);

/// File timestamps
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileTimes {
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub birthtime: SystemTime,
}

impl FileTimes {
    pub fn now() -> Self {
        let now = SystemTime::now();
        Self {
            atime: now,
            mtime: now,
            ctime: now,
            birthtime: now,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileType {
    File,
    Dir,
    Symlink,
}

impl FileType {
    /// `S_IFMT` bits for this type
    pub fn mode_bits(self) -> u32 {
        match self {
            FileType::File => libc::S_IFREG as u32,
            FileType::Dir => libc::S_IFDIR as u32,
            FileType::Symlink => libc::S_IFLNK as u32,
        }
    }
}

/// Snapshot of a node's attributes as seen through one name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub(crate) name: String,
    pub(crate) file_type: FileType,
    pub(crate) perm: u32,
    pub(crate) len: u64,
    pub(crate) uid: u32,
    pub(crate) gid: u32,
    pub(crate) nlink: u32,
    pub(crate) ino: u64,
    pub(crate) times: FileTimes,
}

impl Metadata {
    /// Base name of the entry
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Dir
    }

    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type == FileType::Symlink
    }

    /// Permission bits only
    pub fn permissions(&self) -> u32 {
        self.perm
    }

    /// Type bits combined with permission bits, as in `st_mode`
    pub fn mode(&self) -> u32 {
        self.file_type.mode_bits() | self.perm
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn nlink(&self) -> u32 {
        self.nlink
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn times(&self) -> FileTimes {
        self.times
    }

    pub fn modified(&self) -> SystemTime {
        self.times.mtime
    }

    pub fn accessed(&self) -> SystemTime {
        self.times.atime
    }

    /// Whether both snapshots describe the same underlying node
    pub fn same_file(&self, other: &Metadata) -> bool {
        self.ino == other.ino
    }
}

/// Directory entry produced by a listing cursor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub metadata: Metadata,
}

impl DirEntry {
    pub fn file_type(&self) -> FileType {
        self.metadata.file_type
    }

    pub fn is_dir(&self) -> bool {
        self.metadata.is_dir()
    }
}

/// File open options
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    /// Fail when the file exists; only meaningful with `create`
    pub exclusive: bool,
    pub truncate: bool,
    /// Requested permission bits for a created file, before the umask
    pub mode: u32,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read: false,
            write: false,
            append: false,
            create: false,
            exclusive: false,
            truncate: false,
            mode: 0o666,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&mut self, read: bool) -> &mut Self {
        self.read = read;
        self
    }

    pub fn write(&mut self, write: bool) -> &mut Self {
        self.write = write;
        self
    }

    pub fn append(&mut self, append: bool) -> &mut Self {
        self.append = append;
        self
    }

    pub fn create(&mut self, create: bool) -> &mut Self {
        self.create = create;
        self
    }

    pub fn exclusive(&mut self, exclusive: bool) -> &mut Self {
        self.exclusive = exclusive;
        self
    }

    pub fn truncate(&mut self, truncate: bool) -> &mut Self {
        self.truncate = truncate;
        self
    }

    pub fn mode(&mut self, mode: u32) -> &mut Self {
        self.mode = mode;
        self
    }

    /// Build options from `open(2)` flags
    pub fn from_flags(flags: i32, mode: u32) -> Self {
        let access = flags & libc::O_ACCMODE;
        Self {
            read: access == libc::O_RDONLY || access == libc::O_RDWR,
            write: access == libc::O_WRONLY || access == libc::O_RDWR,
            append: flags & libc::O_APPEND != 0,
            create: flags & libc::O_CREAT != 0,
            exclusive: flags & libc::O_EXCL != 0,
            truncate: flags & libc::O_TRUNC != 0,
            mode,
        }
    }

    pub(crate) fn wants_write(&self) -> bool {
        self.write || self.append
    }

    pub(crate) fn mutates(&self) -> bool {
        self.wants_write() || self.create || self.truncate
    }
}

/// Reference point for a seek
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

impl Whence {
    /// Decode a raw `lseek` whence value
    pub fn from_raw(whence: i32) -> Option<Self> {
        match whence {
            libc::SEEK_SET => Some(Whence::Start),
            libc::SEEK_CUR => Some(Whence::Current),
            libc::SEEK_END => Some(Whence::End),
            _ => None,
        }
    }
}

/// Feature set advertised by a filesystem implementation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const SYMLINK: Capabilities = Capabilities(1 << 0);
    pub const HARDLINK: Capabilities = Capabilities(1 << 1);
    pub const READ_ONLY: Capabilities = Capabilities(1 << 2);
    pub const CHROOT: Capabilities = Capabilities(1 << 3);
    pub const IDENTITY_MGR: Capabilities = Capabilities(1 << 4);
    pub const REAL_FS: Capabilities = Capabilities(1 << 5);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Capabilities) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Capabilities) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}
