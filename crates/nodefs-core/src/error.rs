// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for NodeFS Core
//!
//! Every failure carries a platform-neutral [`FsErrorKind`]. The kind is
//! presented either as a POSIX errno or as a Win32 error code depending on the
//! [`Platform`] the filesystem was configured for.

use std::io;

use crate::config::Platform;

/// Win32 error codes used by the Windows presentation.
pub mod win32 {
    pub const ERROR_FILE_NOT_FOUND: i32 = 2;
    pub const ERROR_PATH_NOT_FOUND: i32 = 3;
    pub const ERROR_ACCESS_DENIED: i32 = 5;
    pub const ERROR_INVALID_HANDLE: i32 = 6;
    pub const ERROR_FILE_EXISTS: i32 = 80;
    pub const ERROR_INVALID_PARAMETER: i32 = 87;
    pub const ERROR_DISK_FULL: i32 = 112;
    pub const ERROR_NEGATIVE_SEEK: i32 = 131;
    pub const ERROR_DIR_NOT_EMPTY: i32 = 145;
    pub const ERROR_DIRECTORY: i32 = 267;
    pub const ERROR_PRIVILEGE_NOT_HELD: i32 = 1314;
    pub const ERROR_CANT_RESOLVE_FILENAME: i32 = 1921;
}

/// Classified filesystem failure
#[derive(thiserror::Error, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FsErrorKind {
    #[error("no such file or directory")]
    NotFound,
    #[error("file exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    DirNotEmpty,
    #[error("permission denied")]
    PermissionDenied,
    #[error("operation not permitted")]
    NotPermitted,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("negative offset")]
    NegativeOffset,
    #[error("negative seek")]
    NegativeSeek,
    #[error("bad file descriptor")]
    BadFileDescriptor,
    #[error("too many levels of symbolic links")]
    TooManyLinks,
    #[error("file already closed")]
    Closed,
    #[error("no space left on device")]
    NoSpace,
}

impl FsErrorKind {
    /// POSIX errno for this kind
    pub fn errno(self) -> i32 {
        match self {
            FsErrorKind::NotFound => libc::ENOENT,
            FsErrorKind::AlreadyExists => libc::EEXIST,
            FsErrorKind::NotADirectory => libc::ENOTDIR,
            FsErrorKind::IsADirectory => libc::EISDIR,
            FsErrorKind::DirNotEmpty => libc::ENOTEMPTY,
            FsErrorKind::PermissionDenied => libc::EACCES,
            FsErrorKind::NotPermitted => libc::EPERM,
            FsErrorKind::InvalidArgument
            | FsErrorKind::NegativeOffset
            | FsErrorKind::NegativeSeek => libc::EINVAL,
            FsErrorKind::BadFileDescriptor | FsErrorKind::Closed => libc::EBADF,
            FsErrorKind::TooManyLinks => libc::ELOOP,
            FsErrorKind::NoSpace => libc::ENOSPC,
        }
    }

    /// Win32 error code for this kind
    pub fn win32_code(self) -> i32 {
        match self {
            FsErrorKind::NotFound => win32::ERROR_FILE_NOT_FOUND,
            FsErrorKind::AlreadyExists => win32::ERROR_FILE_EXISTS,
            FsErrorKind::NotADirectory => win32::ERROR_PATH_NOT_FOUND,
            FsErrorKind::IsADirectory => win32::ERROR_DIRECTORY,
            FsErrorKind::DirNotEmpty => win32::ERROR_DIR_NOT_EMPTY,
            FsErrorKind::PermissionDenied => win32::ERROR_ACCESS_DENIED,
            FsErrorKind::NotPermitted => win32::ERROR_PRIVILEGE_NOT_HELD,
            FsErrorKind::InvalidArgument => win32::ERROR_INVALID_PARAMETER,
            FsErrorKind::NegativeOffset | FsErrorKind::NegativeSeek => win32::ERROR_NEGATIVE_SEEK,
            FsErrorKind::BadFileDescriptor | FsErrorKind::Closed => win32::ERROR_INVALID_HANDLE,
            FsErrorKind::TooManyLinks => win32::ERROR_CANT_RESOLVE_FILENAME,
            FsErrorKind::NoSpace => win32::ERROR_DISK_FULL,
        }
    }

    /// Platform-specific code for this kind
    pub fn code(self, platform: Platform) -> i32 {
        match platform {
            Platform::Posix => self.errno(),
            Platform::Windows => self.win32_code(),
        }
    }

    pub fn io_kind(self) -> io::ErrorKind {
        match self {
            FsErrorKind::NotFound => io::ErrorKind::NotFound,
            FsErrorKind::AlreadyExists => io::ErrorKind::AlreadyExists,
            FsErrorKind::PermissionDenied | FsErrorKind::NotPermitted => {
                io::ErrorKind::PermissionDenied
            }
            FsErrorKind::InvalidArgument
            | FsErrorKind::NegativeOffset
            | FsErrorKind::NegativeSeek => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        }
    }
}

/// Core filesystem error type
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum FsError {
    /// Failure of a single-path operation
    #[error("{op} {path}: {kind}")]
    Path {
        op: &'static str,
        path: String,
        kind: FsErrorKind,
    },
    /// Failure of a two-path operation (rename, link)
    #[error("{op} {old} {new}: {kind}")]
    Link {
        op: &'static str,
        old: String,
        new: String,
        kind: FsErrorKind,
    },
}

impl FsError {
    pub fn path(op: &'static str, path: impl Into<String>, kind: FsErrorKind) -> Self {
        FsError::Path {
            op,
            path: path.into(),
            kind,
        }
    }

    pub fn link(
        op: &'static str,
        old: impl Into<String>,
        new: impl Into<String>,
        kind: FsErrorKind,
    ) -> Self {
        FsError::Link {
            op,
            old: old.into(),
            new: new.into(),
            kind,
        }
    }

    pub fn kind(&self) -> FsErrorKind {
        match self {
            FsError::Path { kind, .. } | FsError::Link { kind, .. } => *kind,
        }
    }

    pub fn op(&self) -> &'static str {
        match self {
            FsError::Path { op, .. } | FsError::Link { op, .. } => op,
        }
    }

    pub fn code(&self, platform: Platform) -> i32 {
        self.kind().code(platform)
    }
}

impl From<FsError> for io::Error {
    fn from(err: FsError) -> Self {
        io::Error::new(err.kind().io_kind(), err)
    }
}

pub type FsResult<T> = Result<T, FsError>;

/// Result type for internal helpers that know the failure kind but not the caller's op/path
pub(crate) type KindResult<T> = Result<T, FsErrorKind>;
