// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Read-only view over another filesystem

use std::time::SystemTime;

use crate::config::Platform;
use crate::error::{FsError, FsErrorKind, FsResult};
use crate::interface::{FileHandle, Filesystem};
use crate::types::{Capabilities, DirEntry, Metadata, OpenOptions, Whence};

fn denied<T>(op: &'static str, path: &str) -> FsResult<T> {
    Err(FsError::path(op, path, FsErrorKind::PermissionDenied))
}

fn denied_link<T>(op: &'static str, old: &str, new: &str) -> FsResult<T> {
    Err(FsError::link(op, old, new, FsErrorKind::PermissionDenied))
}

/// Wraps a filesystem and rejects every mutation with permission denied
#[derive(Clone, Debug)]
pub struct ReadOnlyFs<F> {
    inner: F,
}

impl<F: Filesystem> ReadOnlyFs<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}

impl<F: Filesystem> Filesystem for ReadOnlyFs<F> {
    fn mkdir(&self, path: &str, _perm: u32) -> FsResult<()> {
        denied("mkdir", path)
    }

    fn mkdir_all(&self, path: &str, _perm: u32) -> FsResult<()> {
        denied("mkdir", path)
    }

    fn remove(&self, path: &str) -> FsResult<()> {
        denied("remove", path)
    }

    fn remove_all(&self, path: &str) -> FsResult<()> {
        denied("removeall", path)
    }

    fn rename(&self, old: &str, new: &str) -> FsResult<()> {
        denied_link("rename", old, new)
    }

    fn link(&self, old: &str, new: &str) -> FsResult<()> {
        denied_link("link", old, new)
    }

    fn symlink(&self, target: &str, link: &str) -> FsResult<()> {
        denied_link("symlink", target, link)
    }

    fn readlink(&self, path: &str) -> FsResult<String> {
        self.inner.readlink(path)
    }

    fn eval_symlinks(&self, path: &str) -> FsResult<String> {
        self.inner.eval_symlinks(path)
    }

    fn stat(&self, path: &str) -> FsResult<Metadata> {
        self.inner.stat(path)
    }

    fn lstat(&self, path: &str) -> FsResult<Metadata> {
        self.inner.lstat(path)
    }

    fn chmod(&self, path: &str, _perm: u32) -> FsResult<()> {
        denied("chmod", path)
    }

    fn chown(&self, path: &str, _uid: u32, _gid: u32) -> FsResult<()> {
        denied("chown", path)
    }

    fn lchown(&self, path: &str, _uid: u32, _gid: u32) -> FsResult<()> {
        denied("lchown", path)
    }

    fn chtimes(&self, path: &str, _atime: SystemTime, _mtime: SystemTime) -> FsResult<()> {
        denied("chtimes", path)
    }

    fn truncate(&self, path: &str, _size: i64) -> FsResult<()> {
        denied("truncate", path)
    }

    fn chdir(&self, path: &str) -> FsResult<()> {
        self.inner.chdir(path)
    }

    fn getwd(&self) -> FsResult<String> {
        self.inner.getwd()
    }

    fn chroot(&self, path: &str) -> FsResult<()> {
        denied("chroot", path)
    }

    fn open_file(&self, path: &str, opts: &OpenOptions) -> FsResult<Box<dyn FileHandle>> {
        if opts.mutates() {
            return denied("open", path);
        }
        let file = self.inner.open_file(path, opts)?;
        Ok(Box::new(ReadOnlyFile { inner: file }))
    }

    fn umask(&self) -> u32 {
        self.inner.umask()
    }

    fn set_umask(&self, mask: u32) {
        self.inner.set_umask(mask)
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities() | Capabilities::READ_ONLY
    }

    fn platform(&self) -> Platform {
        self.inner.platform()
    }
}

/// Handle opened through a [`ReadOnlyFs`]
pub struct ReadOnlyFile {
    inner: Box<dyn FileHandle>,
}

impl FileHandle for ReadOnlyFile {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn read(&self, buf: &mut [u8]) -> FsResult<usize> {
        self.inner.read(buf)
    }

    fn read_at(&self, buf: &mut [u8], offset: i64) -> FsResult<usize> {
        self.inner.read_at(buf, offset)
    }

    fn write(&self, _buf: &[u8]) -> FsResult<usize> {
        denied("write", self.name())
    }

    fn write_at(&self, _buf: &[u8], _offset: i64) -> FsResult<usize> {
        denied("write", self.name())
    }

    fn seek(&self, offset: i64, whence: Whence) -> FsResult<i64> {
        self.inner.seek(offset, whence)
    }

    fn seek_raw(&self, offset: i64, whence: i32) -> FsResult<i64> {
        self.inner.seek_raw(offset, whence)
    }

    fn truncate(&self, _size: i64) -> FsResult<()> {
        denied("truncate", self.name())
    }

    fn chmod(&self, _perm: u32) -> FsResult<()> {
        denied("chmod", self.name())
    }

    fn chown(&self, _uid: u32, _gid: u32) -> FsResult<()> {
        denied("chown", self.name())
    }

    fn chdir(&self) -> FsResult<()> {
        self.inner.chdir()
    }

    fn stat(&self) -> FsResult<Metadata> {
        self.inner.stat()
    }

    fn read_dir(&self, n: isize) -> FsResult<Vec<DirEntry>> {
        self.inner.read_dir(n)
    }

    fn sync(&self) -> FsResult<()> {
        self.inner.sync()
    }

    fn fd(&self) -> u64 {
        self.inner.fd()
    }

    fn close(&self) -> FsResult<()> {
        self.inner.close()
    }
}
