// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Open handle table

use std::collections::HashMap;

use crate::error::{FsErrorKind, KindResult};
use crate::types::{DirEntry, HandleId, NodeId};

/// Directory entries captured on the first listing call
#[derive(Debug, Default)]
pub(crate) struct Listing {
    entries: Vec<DirEntry>,
    position: usize,
}

impl Listing {
    pub fn new(entries: Vec<DirEntry>) -> Self {
        Self {
            entries,
            position: 0,
        }
    }

    /// Next `n` entries, or everything left when `n <= 0`
    pub fn take(&mut self, n: isize) -> Vec<DirEntry> {
        let remaining = self.entries.len() - self.position;
        let count = if n <= 0 {
            remaining
        } else {
            remaining.min(n as usize)
        };
        let start = self.position;
        self.position += count;
        self.entries[start..start + count].to_vec()
    }
}

/// Open handle (file or directory)
#[derive(Debug)]
pub(crate) struct Handle {
    pub node: NodeId,
    /// Path as passed to open
    pub name: String,
    pub is_dir: bool,
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub cursor: i64,
    pub listing: Option<Listing>,
}

impl Handle {
    pub fn new(node: NodeId, name: &str, is_dir: bool, read: bool, write: bool, append: bool) -> Self {
        Self {
            node,
            name: name.to_string(),
            is_dir,
            read,
            write,
            append,
            cursor: 0,
            listing: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct HandleTable {
    next_id: u64,
    open: HashMap<HandleId, Handle>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self {
            next_id: 1,
            open: HashMap::new(),
        }
    }
}

impl HandleTable {
    pub fn insert(&mut self, handle: Handle) -> HandleId {
        let id = HandleId::new(self.next_id);
        self.next_id += 1;
        self.open.insert(id, handle);
        id
    }

    pub fn get(&self, id: HandleId) -> KindResult<&Handle> {
        self.open.get(&id).ok_or(FsErrorKind::Closed)
    }

    pub fn get_mut(&mut self, id: HandleId) -> KindResult<&mut Handle> {
        self.open.get_mut(&id).ok_or(FsErrorKind::Closed)
    }

    pub fn remove(&mut self, id: HandleId) -> KindResult<Handle> {
        self.open.remove(&id).ok_or(FsErrorKind::Closed)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileTimes, FileType, Metadata};

    fn entry(name: &str) -> DirEntry {
        DirEntry {
            name: name.to_string(),
            metadata: Metadata {
                name: name.to_string(),
                file_type: FileType::File,
                perm: 0o644,
                len: 0,
                uid: 0,
                gid: 0,
                nlink: 1,
                ino: 7,
                times: FileTimes::now(),
            },
        }
    }

    #[test]
    fn listing_never_repeats_entries() {
        let mut listing = Listing::new(vec![entry("a"), entry("b"), entry("c")]);
        assert_eq!(listing.take(2).len(), 2);
        let rest = listing.take(2);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].name, "c");
        assert!(listing.take(2).is_empty());
        assert!(listing.take(-1).is_empty());
    }

    #[test]
    fn non_positive_count_takes_everything_left() {
        let mut listing = Listing::new(vec![entry("a"), entry("b"), entry("c")]);
        listing.take(1);
        assert_eq!(listing.take(0).len(), 2);
    }

    #[test]
    fn removed_handle_reports_closed() {
        let mut table = HandleTable::default();
        let id = table.insert(Handle::new(NodeId(3), "/f", false, true, false, false));
        assert_eq!(table.len(), 1);
        table.remove(id).expect("first close");
        assert_eq!(table.remove(id).map(|_| ()), Err(FsErrorKind::Closed));
        assert!(matches!(table.get(id), Err(FsErrorKind::Closed)));
    }
}
