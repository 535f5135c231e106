// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Small path-string helpers shared by metadata naming, walk and glob

use crate::config::Platform;

/// Last component of `path`, ignoring trailing separators
pub(crate) fn base_name(path: &str, platform: Platform) -> String {
    let trimmed = path.trim_end_matches(|c: char| platform.is_separator(c));
    if trimmed.is_empty() {
        return if path.is_empty() { ".".to_string() } else { "/".to_string() };
    }
    match trimmed.rfind(|c: char| platform.is_separator(c)) {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

/// Whether the final component is `.` or `..`
pub(crate) fn ends_in_dot(path: &str, platform: Platform) -> bool {
    !path.is_empty() && matches!(base_name(path, platform).as_str(), "." | "..")
}

/// Split after the last separator; the directory part keeps it
pub(crate) fn split(path: &str, platform: Platform) -> (&str, &str) {
    match path.rfind(|c: char| platform.is_separator(c)) {
        Some(idx) => (&path[..idx + 1], &path[idx + 1..]),
        None => ("", path),
    }
}

/// Directory part of a split, without its trailing separator
pub(crate) fn clean_dir(dir: &str, platform: Platform) -> &str {
    if dir.is_empty() {
        return ".";
    }
    let trimmed = dir.trim_end_matches(|c: char| platform.is_separator(c));
    if trimmed.is_empty() {
        &dir[..1]
    } else {
        trimmed
    }
}

pub(crate) fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() || dir == "." {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}
