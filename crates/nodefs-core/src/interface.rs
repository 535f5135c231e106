// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Capability traits shared by every filesystem implementation

use std::time::SystemTime;

use crate::config::Platform;
use crate::error::{FsError, FsErrorKind, FsResult};
use crate::file::File;
use crate::types::{Capabilities, DirEntry, Metadata, OpenOptions, Whence};
use crate::vfs::MemFs;
use crate::walk::{self, WalkAction};

/// Operations on an open handle
pub trait FileHandle: Send + Sync {
    fn name(&self) -> &str;
    fn read(&self, buf: &mut [u8]) -> FsResult<usize>;
    fn read_at(&self, buf: &mut [u8], offset: i64) -> FsResult<usize>;
    fn write(&self, buf: &[u8]) -> FsResult<usize>;
    fn write_at(&self, buf: &[u8], offset: i64) -> FsResult<usize>;
    fn seek(&self, offset: i64, whence: Whence) -> FsResult<i64>;
    fn seek_raw(&self, offset: i64, whence: i32) -> FsResult<i64>;
    fn truncate(&self, size: i64) -> FsResult<()>;
    fn chmod(&self, perm: u32) -> FsResult<()>;
    fn chown(&self, uid: u32, gid: u32) -> FsResult<()>;
    fn chdir(&self) -> FsResult<()>;
    fn stat(&self) -> FsResult<Metadata>;
    fn read_dir(&self, n: isize) -> FsResult<Vec<DirEntry>>;
    fn sync(&self) -> FsResult<()>;
    fn fd(&self) -> u64;
    fn close(&self) -> FsResult<()>;

    fn readdir_names(&self, n: isize) -> FsResult<Vec<String>> {
        Ok(self.read_dir(n)?.into_iter().map(|entry| entry.name).collect())
    }
}

/// Filesystem capability set.
///
/// The trait is object safe so callers can hold a `Box<dyn Filesystem>` and
/// swap the in-memory tree for a wrapped or restricted view.
pub trait Filesystem: Send + Sync {
    fn mkdir(&self, path: &str, perm: u32) -> FsResult<()>;
    fn mkdir_all(&self, path: &str, perm: u32) -> FsResult<()>;
    fn remove(&self, path: &str) -> FsResult<()>;
    fn remove_all(&self, path: &str) -> FsResult<()>;
    fn rename(&self, old: &str, new: &str) -> FsResult<()>;
    fn link(&self, old: &str, new: &str) -> FsResult<()>;
    fn symlink(&self, target: &str, link: &str) -> FsResult<()>;
    fn readlink(&self, path: &str) -> FsResult<String>;
    fn eval_symlinks(&self, path: &str) -> FsResult<String>;
    fn stat(&self, path: &str) -> FsResult<Metadata>;
    fn lstat(&self, path: &str) -> FsResult<Metadata>;
    fn chmod(&self, path: &str, perm: u32) -> FsResult<()>;
    fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()>;
    fn lchown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()>;
    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> FsResult<()>;
    fn truncate(&self, path: &str, size: i64) -> FsResult<()>;
    fn chdir(&self, path: &str) -> FsResult<()>;
    fn getwd(&self) -> FsResult<String>;
    fn chroot(&self, path: &str) -> FsResult<()>;
    fn open_file(&self, path: &str, opts: &OpenOptions) -> FsResult<Box<dyn FileHandle>>;
    fn umask(&self) -> u32;
    fn set_umask(&self, mask: u32);
    fn capabilities(&self) -> Capabilities;
    fn platform(&self) -> Platform;

    fn open(&self, path: &str) -> FsResult<Box<dyn FileHandle>> {
        self.open_file(path, OpenOptions::new().read(true))
    }

    fn create(&self, path: &str) -> FsResult<Box<dyn FileHandle>> {
        self.open_file(
            path,
            OpenOptions::new().read(true).write(true).create(true).truncate(true),
        )
    }

    fn read_file(&self, path: &str) -> FsResult<Vec<u8>> {
        let file = self.open(path)?;
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        file.close()?;
        Ok(out)
    }

    fn write_file(&self, path: &str, data: &[u8], perm: u32) -> FsResult<()> {
        let file = self.open_file(
            path,
            OpenOptions::new().write(true).create(true).truncate(true).mode(perm),
        )?;
        let mut written = 0;
        while written < data.len() {
            let n = file.write(&data[written..])?;
            if n == 0 {
                return Err(FsError::path("write", path, FsErrorKind::InvalidArgument));
            }
            written += n;
        }
        file.close()
    }

    /// Every entry of a directory, sorted by name
    fn read_dir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let dir = self.open(path)?;
        let mut entries = dir.read_dir(-1)?;
        dir.close()?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn same_file(&self, a: &str, b: &str) -> FsResult<bool> {
        Ok(self.stat(a)?.same_file(&self.stat(b)?))
    }

    /// Paths matching a shell pattern, in lexical order
    fn glob(&self, pattern: &str) -> FsResult<Vec<String>> {
        walk::glob(self, pattern)
    }

    /// Visit `root` and everything below it, directories before their contents
    fn walk(
        &self,
        root: &str,
        visit: &mut dyn FnMut(&str, FsResult<Metadata>) -> FsResult<WalkAction>,
    ) -> FsResult<()> {
        walk::walk(self, root, visit)
    }
}

impl FileHandle for File {
    fn name(&self) -> &str {
        File::name(self)
    }

    fn read(&self, buf: &mut [u8]) -> FsResult<usize> {
        File::read(self, buf)
    }

    fn read_at(&self, buf: &mut [u8], offset: i64) -> FsResult<usize> {
        File::read_at(self, buf, offset)
    }

    fn write(&self, buf: &[u8]) -> FsResult<usize> {
        File::write(self, buf)
    }

    fn write_at(&self, buf: &[u8], offset: i64) -> FsResult<usize> {
        File::write_at(self, buf, offset)
    }

    fn seek(&self, offset: i64, whence: Whence) -> FsResult<i64> {
        File::seek(self, offset, whence)
    }

    fn seek_raw(&self, offset: i64, whence: i32) -> FsResult<i64> {
        File::seek_raw(self, offset, whence)
    }

    fn truncate(&self, size: i64) -> FsResult<()> {
        File::truncate(self, size)
    }

    fn chmod(&self, perm: u32) -> FsResult<()> {
        File::chmod(self, perm)
    }

    fn chown(&self, uid: u32, gid: u32) -> FsResult<()> {
        File::chown(self, uid, gid)
    }

    fn chdir(&self) -> FsResult<()> {
        File::chdir(self)
    }

    fn stat(&self) -> FsResult<Metadata> {
        File::stat(self)
    }

    fn read_dir(&self, n: isize) -> FsResult<Vec<DirEntry>> {
        File::read_dir(self, n)
    }

    fn sync(&self) -> FsResult<()> {
        File::sync(self)
    }

    fn fd(&self) -> u64 {
        File::fd(self)
    }

    fn close(&self) -> FsResult<()> {
        File::close(self)
    }
}

impl Filesystem for MemFs {
    fn mkdir(&self, path: &str, perm: u32) -> FsResult<()> {
        MemFs::mkdir(self, path, perm)
    }

    fn mkdir_all(&self, path: &str, perm: u32) -> FsResult<()> {
        MemFs::mkdir_all(self, path, perm)
    }

    fn remove(&self, path: &str) -> FsResult<()> {
        MemFs::remove(self, path)
    }

    fn remove_all(&self, path: &str) -> FsResult<()> {
        MemFs::remove_all(self, path)
    }

    fn rename(&self, old: &str, new: &str) -> FsResult<()> {
        MemFs::rename(self, old, new)
    }

    fn link(&self, old: &str, new: &str) -> FsResult<()> {
        MemFs::link(self, old, new)
    }

    fn symlink(&self, target: &str, link: &str) -> FsResult<()> {
        MemFs::symlink(self, target, link)
    }

    fn readlink(&self, path: &str) -> FsResult<String> {
        MemFs::readlink(self, path)
    }

    fn eval_symlinks(&self, path: &str) -> FsResult<String> {
        MemFs::eval_symlinks(self, path)
    }

    fn stat(&self, path: &str) -> FsResult<Metadata> {
        MemFs::stat(self, path)
    }

    fn lstat(&self, path: &str) -> FsResult<Metadata> {
        MemFs::lstat(self, path)
    }

    fn chmod(&self, path: &str, perm: u32) -> FsResult<()> {
        MemFs::chmod(self, path, perm)
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        MemFs::chown(self, path, uid, gid)
    }

    fn lchown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        MemFs::lchown(self, path, uid, gid)
    }

    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> FsResult<()> {
        MemFs::chtimes(self, path, atime, mtime)
    }

    fn truncate(&self, path: &str, size: i64) -> FsResult<()> {
        MemFs::truncate(self, path, size)
    }

    fn chdir(&self, path: &str) -> FsResult<()> {
        MemFs::chdir(self, path)
    }

    fn getwd(&self) -> FsResult<String> {
        MemFs::getwd(self)
    }

    fn chroot(&self, path: &str) -> FsResult<()> {
        MemFs::chroot(self, path)
    }

    fn open_file(&self, path: &str, opts: &OpenOptions) -> FsResult<Box<dyn FileHandle>> {
        Ok(Box::new(MemFs::open_file(self, path, opts)?))
    }

    fn umask(&self) -> u32 {
        MemFs::umask(self)
    }

    fn set_umask(&self, mask: u32) {
        MemFs::set_umask(self, mask)
    }

    fn capabilities(&self) -> Capabilities {
        MemFs::capabilities(self)
    }

    fn platform(&self) -> Platform {
        MemFs::platform(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FsConfig;

    fn boxed() -> Box<dyn Filesystem> {
        Box::new(MemFs::new(FsConfig::default()).expect("filesystem"))
    }

    #[test]
    fn test_read_write_file_helpers() {
        let fs = boxed();
        fs.write_file("/greeting", b"hello", 0o600).expect("write_file");
        assert_eq!(fs.read_file("/greeting").expect("read_file"), b"hello");
        assert_eq!(fs.stat("/greeting").expect("stat").permissions(), 0o600);

        fs.write_file("/greeting", b"hi", 0o644).expect("overwrite");
        assert_eq!(fs.read_file("/greeting").expect("read_file"), b"hi");
        assert_eq!(fs.stat("/greeting").expect("stat").permissions(), 0o600);
    }

    #[test]
    fn test_read_dir_is_sorted() {
        let fs = boxed();
        fs.mkdir("/d", 0o755).expect("mkdir");
        for name in ["zeta", "alpha", "mid"] {
            fs.write_file(&format!("/d/{name}"), b"", 0o644).expect("write");
        }
        let names: Vec<String> = fs
            .read_dir("/d")
            .expect("read_dir")
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_same_file_through_links() {
        let fs = boxed();
        fs.write_file("/a", b"x", 0o644).expect("write");
        fs.link("/a", "/b").expect("link");
        fs.symlink("/a", "/c").expect("symlink");
        fs.write_file("/d", b"x", 0o644).expect("write");
        assert!(fs.same_file("/a", "/b").expect("same"));
        assert!(fs.same_file("/a", "/c").expect("same"));
        assert!(!fs.same_file("/a", "/d").expect("different"));
    }

    #[test]
    fn test_handle_through_trait_object() {
        let fs = boxed();
        let file = fs.create("/obj").expect("create");
        file.write(b"abc").expect("write");
        assert_eq!(file.seek(0, Whence::Start).expect("seek"), 0);
        let mut buf = [0u8; 3];
        file.read(&mut buf).expect("read");
        assert_eq!(&buf, b"abc");
        assert_eq!(file.name(), "/obj");
        file.close().expect("close");
        assert_eq!(file.fd(), u64::MAX);
    }
}
