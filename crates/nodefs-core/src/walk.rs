// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Tree walking and shell-pattern matching over any [`Filesystem`]

use glob::{MatchOptions, Pattern};

use crate::error::{FsError, FsErrorKind, FsResult};
use crate::interface::Filesystem;
use crate::path::{clean_dir, join, split};
use crate::types::Metadata;

/// What a walk callback wants next
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkAction {
    Continue,
    /// On a directory: skip its contents. On a file: skip its remaining siblings.
    SkipDir,
}

type Visit<'a> = dyn FnMut(&str, FsResult<Metadata>) -> FsResult<WalkAction> + 'a;

pub fn walk<F: Filesystem + ?Sized>(fs: &F, root: &str, visit: &mut Visit<'_>) -> FsResult<()> {
    let result = match fs.lstat(root) {
        Ok(meta) => walk_entry(fs, root, meta, visit),
        Err(err) => visit(root, Err(err)),
    };
    result.map(|_| ())
}

fn walk_entry<F: Filesystem + ?Sized>(
    fs: &F,
    path: &str,
    meta: Metadata,
    visit: &mut Visit<'_>,
) -> FsResult<WalkAction> {
    if !meta.is_dir() {
        return visit(path, Ok(meta));
    }
    if visit(path, Ok(meta))? == WalkAction::SkipDir {
        return Ok(WalkAction::SkipDir);
    }

    let entries = match fs.read_dir(path) {
        Ok(entries) => entries,
        Err(err) => return visit(path, Err(err)),
    };
    for entry in entries {
        let child = join(path, &entry.name);
        let child_meta = match fs.lstat(&child) {
            Ok(meta) => meta,
            Err(err) => {
                visit(&child, Err(err))?;
                continue;
            }
        };
        let is_dir = child_meta.is_dir();
        if walk_entry(fs, &child, child_meta, visit)? == WalkAction::SkipDir && !is_dir {
            return Ok(WalkAction::SkipDir);
        }
    }
    Ok(WalkAction::Continue)
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

fn has_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

fn bad_pattern(pattern: &str) -> FsError {
    FsError::path("glob", pattern, FsErrorKind::InvalidArgument)
}

/// Every existing path matching `pattern`. Unreadable directories are skipped.
pub fn glob<F: Filesystem + ?Sized>(fs: &F, pattern: &str) -> FsResult<Vec<String>> {
    Pattern::new(pattern).map_err(|_| bad_pattern(pattern))?;

    if !has_meta(pattern) {
        return Ok(match fs.lstat(pattern) {
            Ok(_) => vec![pattern.to_string()],
            Err(_) => Vec::new(),
        });
    }

    let platform = fs.platform();
    let (dir, file) = split(pattern, platform);
    let dir = clean_dir(dir, platform);
    let mut matches = Vec::new();

    if !has_meta(dir) {
        glob_in(fs, dir, file, &mut matches)?;
        return Ok(matches);
    }
    if dir == pattern {
        return Err(bad_pattern(pattern));
    }
    for parent in glob(fs, dir)? {
        glob_in(fs, &parent, file, &mut matches)?;
    }
    Ok(matches)
}

fn glob_in<F: Filesystem + ?Sized>(
    fs: &F,
    dir: &str,
    pattern: &str,
    matches: &mut Vec<String>,
) -> FsResult<()> {
    let compiled = Pattern::new(pattern).map_err(|_| bad_pattern(pattern))?;
    match fs.stat(dir) {
        Ok(meta) if meta.is_dir() => {}
        _ => return Ok(()),
    }
    let Ok(entries) = fs.read_dir(dir) else {
        return Ok(());
    };
    for entry in entries {
        if compiled.matches_with(&entry.name, MATCH_OPTIONS) {
            // A relative pattern yields relative matches
            let path = if dir == "." {
                entry.name
            } else {
                join(dir, &entry.name)
            };
            matches.push(path);
        }
    }
    Ok(())
}
