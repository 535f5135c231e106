// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Open file and directory handles

use std::io;

use crate::error::{FsError, FsErrorKind, FsResult, KindResult};
use crate::types::{DirEntry, HandleId, Metadata, Whence};
use crate::vfs::{MemFs, OpContext, State};

/// Handle returned by [`MemFs::open_file`].
///
/// Every method takes `&self`; the cursor lives in the filesystem's handle
/// table, so concurrent callers on one handle serialize on the filesystem
/// lock. Dropping the handle closes it.
#[derive(Debug)]
pub struct File {
    fs: Option<MemFs>,
    id: HandleId,
    name: String,
}

impl File {
    pub(crate) fn new(fs: MemFs, id: HandleId, name: &str) -> Self {
        Self {
            fs: Some(fs),
            id,
            name: name.to_string(),
        }
    }

    /// A handle that refers to nothing; every operation fails with invalid argument
    pub fn invalid() -> Self {
        Self {
            fs: None,
            id: HandleId::new(0),
            name: String::new(),
        }
    }

    /// Path the handle was opened with
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    fn op<T>(
        &self,
        op: &'static str,
        mutating: bool,
        f: impl FnOnce(&mut State, &OpContext<'_>, HandleId) -> KindResult<T>,
    ) -> FsResult<T> {
        let result = match &self.fs {
            Some(fs) => fs.handle_op(mutating, |state, ctx| f(state, ctx, self.id)),
            None => Err(FsErrorKind::InvalidArgument),
        };
        result.map_err(|kind| FsError::path(op, self.name.clone(), kind))
    }

    pub fn read(&self, buf: &mut [u8]) -> FsResult<usize> {
        self.op("read", false, |state, ctx, id| state.read(ctx, id, buf, None))
    }

    pub fn read_at(&self, buf: &mut [u8], offset: i64) -> FsResult<usize> {
        self.op("read", false, |state, ctx, id| state.read(ctx, id, buf, Some(offset)))
    }

    pub fn write(&self, buf: &[u8]) -> FsResult<usize> {
        self.op("write", true, |state, _, id| state.write(id, buf, None))
    }

    pub fn write_at(&self, buf: &[u8], offset: i64) -> FsResult<usize> {
        self.op("write", true, |state, _, id| state.write(id, buf, Some(offset)))
    }

    pub fn write_str(&self, s: &str) -> FsResult<usize> {
        self.write(s.as_bytes())
    }

    pub fn seek(&self, offset: i64, whence: Whence) -> FsResult<i64> {
        self.op("seek", false, |state, ctx, id| state.seek(ctx, id, offset, whence))
    }

    /// Seek with an `lseek(2)` whence value
    pub fn seek_raw(&self, offset: i64, whence: i32) -> FsResult<i64> {
        self.op("seek", false, |state, ctx, id| state.seek_raw(ctx, id, offset, whence))
    }

    pub fn truncate(&self, size: i64) -> FsResult<()> {
        self.op("truncate", true, |state, ctx, id| state.truncate_handle(ctx, id, size))
    }

    pub fn chmod(&self, perm: u32) -> FsResult<()> {
        self.op("chmod", true, |state, ctx, id| state.chmod_handle(ctx, id, perm))
    }

    pub fn chown(&self, uid: u32, gid: u32) -> FsResult<()> {
        self.op("chown", true, |state, ctx, id| state.chown_handle(ctx, id, uid, gid))
    }

    pub fn chdir(&self) -> FsResult<()> {
        self.op("chdir", false, |state, _, id| state.chdir_handle(id))
    }

    pub fn stat(&self) -> FsResult<Metadata> {
        self.op("stat", false, |state, ctx, id| state.stat_handle(ctx, id))
    }

    /// Next `n` entries in insertion order; `n <= 0` returns all remaining
    pub fn read_dir(&self, n: isize) -> FsResult<Vec<DirEntry>> {
        self.op("readdirent", false, |state, _, id| state.read_dir(id, n))
    }

    pub fn readdir_names(&self, n: isize) -> FsResult<Vec<String>> {
        Ok(self
            .read_dir(n)?
            .into_iter()
            .map(|entry| entry.name)
            .collect())
    }

    /// Contents already live in memory; only the handle is validated
    pub fn sync(&self) -> FsResult<()> {
        self.op("sync", false, |state, _, id| state.handle_node(id).map(|_| ()))
    }

    /// Handle number, or `u64::MAX` once closed
    pub fn fd(&self) -> u64 {
        match &self.fs {
            Some(fs) => fs
                .handle_op(false, |state, _| state.handle_node(self.id))
                .map(|_| self.id.0)
                .unwrap_or(u64::MAX),
            None => u64::MAX,
        }
    }

    pub fn close(&self) -> FsResult<()> {
        self.op("close", false, |state, _, id| state.close(id))
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if let Some(fs) = &self.fs {
            let _ = fs.handle_op(false, |state, _| state.close(self.id));
        }
    }
}

impl io::Read for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        File::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Write for File {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        File::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sync().map_err(io::Error::from)
    }
}

impl io::Seek for File {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (offset, whence) = match pos {
            io::SeekFrom::Start(off) => (
                i64::try_from(off).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?,
                Whence::Start,
            ),
            io::SeekFrom::Current(off) => (off, Whence::Current),
            io::SeekFrom::End(off) => (off, Whence::End),
        };
        let pos = File::seek(self, offset, whence)?;
        Ok(pos as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom, Write};

    use super::*;
    use crate::config::{FsConfig, Platform};
    use crate::types::OpenOptions;

    fn create_test_fs() -> MemFs {
        MemFs::new(FsConfig::default()).expect("filesystem")
    }

    fn open_rw(fs: &MemFs, path: &str) -> File {
        fs.open_file(path, OpenOptions::new().read(true).write(true).create(true))
            .expect("open rw")
    }

    #[test]
    fn test_write_then_read_back_through_cursor() {
        let fs = create_test_fs();
        let file = open_rw(&fs, "/f");
        assert_eq!(file.write(b"hello world").expect("write"), 11);
        assert_eq!(file.seek(0, Whence::Start).expect("rewind"), 0);

        let mut buf = [0u8; 5];
        assert_eq!(file.read(&mut buf).expect("read"), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(file.seek(0, Whence::Current).expect("tell"), 5);
        assert_eq!(file.seek(-5, Whence::End).expect("end"), 6);
        assert_eq!(file.read(&mut buf).expect("read"), 5);
        assert_eq!(&buf, b"world");
        assert_eq!(file.read(&mut buf).expect("eof"), 0);
    }

    #[test]
    fn test_positional_io_leaves_cursor() {
        let fs = create_test_fs();
        let file = open_rw(&fs, "/f");
        file.write(b"abcdef").expect("write");
        file.write_at(b"XY", 2).expect("write_at");
        let mut buf = [0u8; 3];
        assert_eq!(file.read_at(&mut buf, 1).expect("read_at"), 3);
        assert_eq!(&buf, b"bXY");
        assert_eq!(file.seek(0, Whence::Current).expect("tell"), 6);
        assert_eq!(
            file.read_at(&mut buf, -1).expect_err("negative").kind(),
            FsErrorKind::NegativeOffset
        );
        assert_eq!(
            file.write_at(b"x", -1).expect_err("negative").kind(),
            FsErrorKind::NegativeOffset
        );
    }

    #[test]
    fn test_sparse_write_zero_fills() {
        let fs = create_test_fs();
        let file = open_rw(&fs, "/sparse");
        file.write_at(b"z", 4).expect("write past end");
        let mut buf = [0xffu8; 5];
        assert_eq!(file.read_at(&mut buf, 0).expect("read"), 5);
        assert_eq!(&buf, b"\0\0\0\0z");
    }

    #[test]
    fn test_append_mode() {
        let fs = create_test_fs();
        let file = open_rw(&fs, "/log");
        file.write(b"one").expect("write");
        file.close().expect("close");

        let file = fs
            .open_file("/log", OpenOptions::new().append(true))
            .expect("open append");
        file.write(b"two").expect("append");
        assert_eq!(
            file.write_at(b"x", 0).expect_err("positional append").kind(),
            FsErrorKind::InvalidArgument
        );
        assert_eq!(fs.stat("/log").expect("stat").len(), 6);
    }

    #[test]
    fn test_access_mode_enforced() {
        let fs = create_test_fs();
        open_rw(&fs, "/f").write(b"data").expect("seed");

        let ro = fs.open("/f").expect("read only");
        assert_eq!(ro.write(b"x").expect_err("ro write").kind(), FsErrorKind::BadFileDescriptor);
        assert_eq!(ro.truncate(0).expect_err("ro truncate").kind(), FsErrorKind::InvalidArgument);

        let wo = fs.open_file("/f", OpenOptions::new().write(true)).expect("write only");
        let mut buf = [0u8; 4];
        assert_eq!(wo.read(&mut buf).expect_err("wo read").kind(), FsErrorKind::BadFileDescriptor);
    }

    #[test]
    fn test_closed_handle_rejects_everything() {
        let fs = create_test_fs();
        let file = open_rw(&fs, "/f");
        assert_ne!(file.fd(), u64::MAX);
        file.close().expect("close");
        assert_eq!(file.fd(), u64::MAX);

        let mut buf = [0u8; 1];
        assert_eq!(file.read(&mut buf).expect_err("read").kind(), FsErrorKind::Closed);
        assert_eq!(file.write(b"x").expect_err("write").kind(), FsErrorKind::Closed);
        assert_eq!(file.seek(0, Whence::Start).expect_err("seek").kind(), FsErrorKind::Closed);
        assert_eq!(file.stat().expect_err("stat").kind(), FsErrorKind::Closed);
        let err = file.close().expect_err("double close");
        assert_eq!(err.kind(), FsErrorKind::Closed);
        assert_eq!(err.op(), "close");
        assert_eq!(fs.stats().open_handles, 0);
    }

    #[test]
    fn test_invalid_handle() {
        let file = File::invalid();
        assert_eq!(file.close().expect_err("close").kind(), FsErrorKind::InvalidArgument);
        assert_eq!(file.stat().expect_err("stat").kind(), FsErrorKind::InvalidArgument);
        assert_eq!(file.fd(), u64::MAX);
    }

    #[test]
    fn test_seek_rules() {
        let fs = create_test_fs();
        let file = open_rw(&fs, "/f");
        file.write(b"abc").expect("write");
        assert_eq!(file.seek(10, Whence::Start).expect("past end"), 10);
        let mut buf = [0u8; 2];
        assert_eq!(file.read(&mut buf).expect("eof"), 0);
        assert_eq!(
            file.seek(-1, Whence::Start).expect_err("negative").kind(),
            FsErrorKind::InvalidArgument
        );
        assert_eq!(
            file.seek_raw(0, 42).expect_err("bad whence").kind(),
            FsErrorKind::InvalidArgument
        );
        assert_eq!(file.seek_raw(1, libc::SEEK_SET).expect("raw"), 1);
    }

    #[test]
    fn test_windows_seek_divergences() {
        let fs = MemFs::new(FsConfig::windows()).expect("filesystem");
        let file = open_rw(&fs, "/f");
        file.write(b"abc").expect("write");
        let err = file.seek(-1, Whence::Start).expect_err("negative");
        assert_eq!(err.kind(), FsErrorKind::NegativeSeek);
        assert_eq!(err.code(Platform::Windows), 131);
        assert_eq!(file.seek_raw(2, 42).expect("unknown whence as start"), 2);
    }

    #[test]
    fn test_directory_handle() {
        let fs = create_test_fs();
        fs.mkdir("/d", 0o755).expect("mkdir");
        for name in ["c", "a", "b"] {
            open_rw(&fs, &format!("/d/{name}"));
        }
        let dir = fs.open("/d").expect("open dir");
        assert_eq!(dir.readdir_names(2).expect("first"), vec!["c", "a"]);
        assert_eq!(dir.readdir_names(2).expect("second"), vec!["b"]);
        assert!(dir.readdir_names(2).expect("drained").is_empty());
        assert_eq!(dir.seek(0, Whence::Start).expect("rewind"), 0);
        assert_eq!(dir.readdir_names(-1).expect("all").len(), 3);
        assert_eq!(
            dir.seek(3, Whence::Start).expect_err("nonzero").kind(),
            FsErrorKind::InvalidArgument
        );

        let mut buf = [0u8; 1];
        assert_eq!(dir.read(&mut buf).expect_err("read dir").kind(), FsErrorKind::IsADirectory);

        let file = fs.open("/d/a").expect("open file");
        assert_eq!(file.read_dir(1).expect_err("not dir").kind(), FsErrorKind::NotADirectory);
    }

    #[test]
    fn test_chdir_through_handle() {
        let fs = create_test_fs();
        fs.mkdir_all("/a/b", 0o755).expect("mkdir_all");
        let dir = fs.open("/a/b").expect("open");
        dir.chdir().expect("fchdir");
        assert_eq!(fs.getwd().expect("getwd"), "/a/b");

        fs.chdir("/").expect("back");
        fs.remove("/a/b").expect("remove open dir");
        assert_eq!(dir.chdir().expect_err("removed").kind(), FsErrorKind::NotFound);
    }

    #[test]
    fn test_huge_write_offset_reports_no_space() {
        let fs = create_test_fs();
        let file = open_rw(&fs, "/big");
        file.write(b"abc").expect("write");
        assert_eq!(
            file.write_at(b"x", i64::MAX - 10).expect_err("cannot allocate").kind(),
            FsErrorKind::NoSpace
        );
        assert_eq!(file.stat().expect("stat").len(), 3);
        assert_eq!(
            file.truncate(i64::MAX).expect_err("cannot allocate").kind(),
            FsErrorKind::NoSpace
        );
    }

    #[test]
    fn test_writes_and_truncate_advance_mtime() {
        let fs = create_test_fs();
        let file = open_rw(&fs, "/clock");
        let pause = || std::thread::sleep(std::time::Duration::from_millis(20));

        let mut last = file.stat().expect("stat").modified();
        pause();
        file.write(b"tick").expect("write");
        let now = file.stat().expect("stat").modified();
        assert!(now > last, "write must advance mtime");

        last = now;
        pause();
        file.write_at(b"tock", 2).expect("write_at");
        let now = file.stat().expect("stat").modified();
        assert!(now > last, "write_at must advance mtime");

        last = now;
        pause();
        file.truncate(1).expect("truncate");
        assert!(file.stat().expect("stat").modified() > last, "truncate must advance mtime");
    }

    #[test]
    fn test_unlinked_file_stays_readable_until_close() {
        let fs = create_test_fs();
        let writer = open_rw(&fs, "/tmp");
        writer.write(b"still here").expect("write");
        let nodes = fs.stats().nodes;

        fs.remove("/tmp").expect("unlink while open");
        assert_eq!(fs.stat("/tmp").expect_err("gone").kind(), FsErrorKind::NotFound);
        let mut buf = [0u8; 10];
        assert_eq!(writer.read_at(&mut buf, 0).expect("read"), 10);
        assert_eq!(writer.stat().expect("fstat").nlink(), 0);
        assert_eq!(fs.stats().nodes, nodes);

        writer.close().expect("close");
        assert_eq!(fs.stats().nodes, nodes - 1);
    }

    #[test]
    fn test_handle_metadata_ops() {
        let fs = create_test_fs();
        let file = open_rw(&fs, "/dir-less");
        file.chmod(0o600).expect("fchmod");
        file.chown(5, 6).expect("fchown");
        let meta = file.stat().expect("fstat");
        assert_eq!(meta.permissions(), 0o600);
        assert_eq!((meta.uid(), meta.gid()), (5, 6));
        assert_eq!(meta.name(), "dir-less");
        file.sync().expect("sync");
    }

    #[test]
    fn test_std_io_traits() {
        let fs = create_test_fs();
        let mut file = open_rw(&fs, "/io");
        file.write_all(b"through std::io").expect("write_all");
        file.flush().expect("flush");
        Seek::seek(&mut file, SeekFrom::Start(8)).expect("seek");
        let mut out = String::new();
        file.read_to_string(&mut out).expect("read_to_string");
        assert_eq!(out, "std::io");
    }

    #[test]
    fn test_drop_closes_handle() {
        let fs = create_test_fs();
        {
            let _file = open_rw(&fs, "/f");
            assert_eq!(fs.stats().open_handles, 1);
        }
        assert_eq!(fs.stats().open_handles, 0);
    }
}
