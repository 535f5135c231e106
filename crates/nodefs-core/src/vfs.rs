// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Virtual filesystem implementation for NodeFS Core

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use tracing::{debug, trace};

use crate::config::{FsConfig, Platform};
use crate::error::{FsError, FsErrorKind, FsResult, KindResult};
use crate::file::File;
use crate::handle::{Handle, HandleTable, Listing};
use crate::identity::{IdentityManager, User};
use crate::node::{Node, NodeKind, NodeStore};
use crate::path::{base_name, ends_in_dot};
use crate::permissions::{self, Access, Umask};
use crate::resolver::{Lookup, PathWalker, Resolved};
use crate::types::{Capabilities, DirEntry, HandleId, Metadata, NodeId, OpenOptions, Whence};

/// Node and handle counters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FsStats {
    pub nodes: usize,
    pub open_handles: usize,
}

/// Everything guarded by the filesystem lock
#[derive(Debug)]
pub(crate) struct State {
    store: NodeStore,
    handles: HandleTable,
    root: NodeId,
    cwd: NodeId,
}

/// Per-call inputs resolved before the lock is taken
pub(crate) struct OpContext<'a> {
    config: &'a FsConfig,
    user: User,
    umask: &'a Umask,
}

impl OpContext<'_> {
    fn windows(&self) -> bool {
        self.config.platform.is_windows()
    }
}

struct Shared {
    config: FsConfig,
    umask: Umask,
    identity: Option<Arc<dyn IdentityManager>>,
    state: Mutex<State>,
}

/// In-memory filesystem. Clones share the same tree, handles and working directory.
#[derive(Clone)]
pub struct MemFs {
    shared: Arc<Shared>,
}

impl fmt::Debug for MemFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemFs")
            .field("config", &self.shared.config)
            .field("umask", &self.shared.umask.get())
            .field("identity", &self.shared.identity.is_some())
            .finish()
    }
}

pub struct MemFsBuilder {
    config: FsConfig,
    identity: Option<Arc<dyn IdentityManager>>,
    umask: Option<Umask>,
}

impl MemFsBuilder {
    pub fn identity(mut self, identity: Arc<dyn IdentityManager>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Share a umask with other filesystems instead of owning one
    pub fn umask(mut self, umask: Umask) -> Self {
        self.umask = Some(umask);
        self
    }

    pub fn build(self) -> FsResult<MemFs> {
        let config = self.config;
        if !config.is_valid() {
            return Err(FsError::path("new", "/", FsErrorKind::InvalidArgument));
        }
        let umask = self.umask.unwrap_or_else(|| Umask::new(config.umask));
        let store = NodeStore::new(
            0o755,
            config.security.default_uid,
            config.security.default_gid,
        );
        let root = store.root();
        debug!(
            platform = ?config.platform,
            read_only = config.read_only,
            identity = self.identity.is_some(),
            "created in-memory filesystem"
        );
        Ok(MemFs {
            shared: Arc::new(Shared {
                config,
                umask,
                identity: self.identity,
                state: Mutex::new(State {
                    store,
                    handles: HandleTable::default(),
                    root,
                    cwd: root,
                }),
            }),
        })
    }
}

impl MemFs {
    pub fn new(config: FsConfig) -> FsResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: FsConfig) -> MemFsBuilder {
        MemFsBuilder {
            config,
            identity: None,
            umask: None,
        }
    }

    pub fn config(&self) -> &FsConfig {
        &self.shared.config
    }

    pub fn platform(&self) -> Platform {
        self.shared.config.platform
    }

    pub fn identity(&self) -> Option<&Arc<dyn IdentityManager>> {
        self.shared.identity.as_ref()
    }

    pub fn capabilities(&self) -> Capabilities {
        let config = &self.shared.config;
        let mut caps = Capabilities::empty();
        if config.features.symlinks {
            caps.insert(Capabilities::SYMLINK);
        }
        if config.features.hardlinks {
            caps.insert(Capabilities::HARDLINK);
        }
        if config.features.chroot {
            caps.insert(Capabilities::CHROOT);
        }
        if config.read_only {
            caps.insert(Capabilities::READ_ONLY);
        }
        if self.shared.identity.is_some() {
            caps.insert(Capabilities::IDENTITY_MGR);
        }
        caps
    }

    pub fn umask(&self) -> u32 {
        self.shared.umask.get()
    }

    pub fn set_umask(&self, mask: u32) {
        self.shared.umask.set(mask);
    }

    pub fn stats(&self) -> FsStats {
        let state = self.state();
        FsStats {
            nodes: state.store.len(),
            open_handles: state.handles.len(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_user(&self) -> User {
        match &self.shared.identity {
            Some(identity) => identity.current_user(),
            None => {
                let security = &self.shared.config.security;
                User::new("default", security.default_uid, security.default_gid)
            }
        }
    }

    fn context(&self) -> OpContext<'_> {
        OpContext {
            config: &self.shared.config,
            user: self.current_user(),
            umask: &self.shared.umask,
        }
    }

    /// Read-only rejection comes first, ahead of any lookup
    fn gate(&self, mutating: bool) -> KindResult<()> {
        if mutating && self.shared.config.read_only {
            return Err(FsErrorKind::PermissionDenied);
        }
        Ok(())
    }

    fn feature(&self, enabled: bool) -> KindResult<()> {
        if enabled {
            Ok(())
        } else {
            Err(FsErrorKind::PermissionDenied)
        }
    }

    fn with_state<T>(
        &self,
        mutating: bool,
        f: impl FnOnce(&mut State, &OpContext<'_>) -> KindResult<T>,
    ) -> KindResult<T> {
        self.gate(mutating)?;
        let ctx = self.context();
        let mut state = self.state();
        f(&mut *state, &ctx)
    }

    fn path_op<T>(
        &self,
        op: &'static str,
        path: &str,
        mutating: bool,
        f: impl FnOnce(&mut State, &OpContext<'_>) -> KindResult<T>,
    ) -> FsResult<T> {
        self.with_state(mutating, f)
            .map_err(|kind| FsError::path(op, path, kind))
    }

    /// Entry point used by [`File`] for handle operations
    pub(crate) fn handle_op<T>(
        &self,
        mutating: bool,
        f: impl FnOnce(&mut State, &OpContext<'_>) -> KindResult<T>,
    ) -> KindResult<T> {
        self.with_state(mutating, f)
    }

    pub fn mkdir(&self, path: &str, perm: u32) -> FsResult<()> {
        self.path_op("mkdir", path, true, |state, ctx| state.mkdir(ctx, path, perm))
    }

    pub fn mkdir_all(&self, path: &str, perm: u32) -> FsResult<()> {
        self.path_op("mkdir", path, true, |state, ctx| state.mkdir_all(ctx, path, perm))
    }

    pub fn remove(&self, path: &str) -> FsResult<()> {
        self.path_op("remove", path, true, |state, ctx| state.remove(ctx, path))
    }

    pub fn remove_all(&self, path: &str) -> FsResult<()> {
        self.path_op("removeall", path, true, |state, ctx| state.remove_all(ctx, path))
    }

    pub fn rename(&self, old: &str, new: &str) -> FsResult<()> {
        self.with_state(true, |state, ctx| state.rename(ctx, old, new))
            .map_err(|kind| FsError::link("rename", old, new, kind))
    }

    pub fn link(&self, old: &str, new: &str) -> FsResult<()> {
        self.gate(true)
            .and_then(|_| self.feature(self.shared.config.features.hardlinks))
            .and_then(|_| self.with_state(true, |state, ctx| state.link(ctx, old, new)))
            .map_err(|kind| FsError::link("link", old, new, kind))
    }

    pub fn symlink(&self, target: &str, link: &str) -> FsResult<()> {
        self.gate(true)
            .and_then(|_| self.feature(self.shared.config.features.symlinks))
            .and_then(|_| self.with_state(true, |state, ctx| state.symlink(ctx, target, link)))
            .map_err(|kind| FsError::link("symlink", target, link, kind))
    }

    pub fn readlink(&self, path: &str) -> FsResult<String> {
        self.feature(self.shared.config.features.symlinks)
            .and_then(|_| self.with_state(false, |state, ctx| state.readlink(ctx, path)))
            .map_err(|kind| FsError::path("readlink", path, kind))
    }

    /// Canonical absolute path (inside the current root) with every symlink resolved
    pub fn eval_symlinks(&self, path: &str) -> FsResult<String> {
        self.path_op("lstat", path, false, |state, ctx| state.eval_symlinks(ctx, path))
    }

    pub fn stat(&self, path: &str) -> FsResult<Metadata> {
        self.path_op("stat", path, false, |state, ctx| state.metadata(ctx, path, true))
    }

    pub fn lstat(&self, path: &str) -> FsResult<Metadata> {
        self.path_op("lstat", path, false, |state, ctx| state.metadata(ctx, path, false))
    }

    pub fn chmod(&self, path: &str, perm: u32) -> FsResult<()> {
        self.path_op("chmod", path, true, |state, ctx| {
            let resolved = state.resolve(ctx, path, true)?;
            state.chmod_node(ctx, resolved.node, perm)
        })
    }

    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.path_op("chown", path, true, |state, ctx| {
            let resolved = state.resolve(ctx, path, true)?;
            state.chown_node(ctx, resolved.node, uid, gid)
        })
    }

    pub fn lchown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.path_op("lchown", path, true, |state, ctx| {
            let resolved = state.resolve(ctx, path, false)?;
            state.chown_node(ctx, resolved.node, uid, gid)
        })
    }

    pub fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> FsResult<()> {
        self.path_op("chtimes", path, true, |state, ctx| {
            let resolved = state.resolve(ctx, path, true)?;
            state.chtimes_node(ctx, resolved.node, atime, mtime)
        })
    }

    pub fn truncate(&self, path: &str, size: i64) -> FsResult<()> {
        self.path_op("truncate", path, true, |state, ctx| state.truncate(ctx, path, size))
    }

    /// Restrict this filesystem to the subtree at `path`
    pub fn chroot(&self, path: &str) -> FsResult<()> {
        self.feature(self.shared.config.features.chroot)
            .and_then(|_| {
                self.with_state(false, |state, ctx| {
                    if !ctx.user.is_root() {
                        return Err(FsErrorKind::NotPermitted);
                    }
                    let dir = state.resolve_dir(ctx, path)?;
                    state.root = dir;
                    state.cwd = dir;
                    Ok(())
                })
            })
            .map_err(|kind| FsError::path("chroot", path, kind))?;
        debug!(path, "changed root");
        Ok(())
    }

    pub fn chdir(&self, path: &str) -> FsResult<()> {
        self.path_op("chdir", path, false, |state, ctx| {
            let dir = state.resolve_dir(ctx, path)?;
            state.require(ctx, dir, Access::EXEC)?;
            state.cwd = dir;
            Ok(())
        })
    }

    pub fn getwd(&self) -> FsResult<String> {
        self.path_op("getwd", ".", false, |state, _| {
            state.store.path_of(state.cwd, state.root).ok_or(FsErrorKind::NotFound)
        })
    }

    pub fn open_file(&self, path: &str, opts: &OpenOptions) -> FsResult<File> {
        let id = self.path_op("open", path, opts.mutates(), |state, ctx| state.open(ctx, path, opts))?;
        trace!(path, handle = id.0, "opened handle");
        Ok(File::new(self.clone(), id, path))
    }

    pub fn open(&self, path: &str) -> FsResult<File> {
        self.open_file(path, OpenOptions::new().read(true))
    }

    pub fn create(&self, path: &str) -> FsResult<File> {
        self.open_file(
            path,
            OpenOptions::new().read(true).write(true).create(true).truncate(true),
        )
    }
}

impl State {
    fn walker<'a>(&'a self, ctx: &'a OpContext<'_>) -> PathWalker<'a> {
        PathWalker {
            store: &self.store,
            root: self.root,
            cwd: self.cwd,
            user: &ctx.user,
            policy: &ctx.config.security,
            platform: ctx.config.platform,
            max_hops: ctx.config.max_symlink_hops,
        }
    }

    fn resolve(&self, ctx: &OpContext<'_>, path: &str, follow: bool) -> KindResult<Resolved> {
        self.walker(ctx).resolve(path, follow)
    }

    fn lookup(&self, ctx: &OpContext<'_>, path: &str, follow: bool) -> KindResult<Lookup> {
        self.walker(ctx).lookup(path, follow)
    }

    fn resolve_dir(&self, ctx: &OpContext<'_>, path: &str) -> KindResult<NodeId> {
        let resolved = self.resolve(ctx, path, true)?;
        if !self.store.get(resolved.node)?.is_dir() {
            return Err(FsErrorKind::NotADirectory);
        }
        Ok(resolved.node)
    }

    fn require(&self, ctx: &OpContext<'_>, id: NodeId, want: Access) -> KindResult<()> {
        let node = self.store.get(id)?;
        if permissions::allowed(&ctx.config.security, node.owner(), &ctx.user, want) {
            Ok(())
        } else {
            Err(FsErrorKind::PermissionDenied)
        }
    }

    fn create_entry(
        &mut self,
        ctx: &OpContext<'_>,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        perm: u32,
    ) -> KindResult<NodeId> {
        if self.store.get(parent)?.nlink == 0 {
            // Directory was removed while still in use
            return Err(FsErrorKind::NotFound);
        }
        self.require(ctx, parent, Access::WRITE | Access::EXEC)?;
        let id = self.store.allocate(kind, perm, ctx.user.uid, ctx.user.gid);
        if let Err(kind) = self.store.link_child(parent, name, id) {
            self.store.discard(id);
            return Err(kind);
        }
        Ok(id)
    }

    fn mkdir(&mut self, ctx: &OpContext<'_>, path: &str, perm: u32) -> KindResult<()> {
        match self.lookup(ctx, path, false)? {
            Lookup::Found(_) => Err(FsErrorKind::AlreadyExists),
            Lookup::Missing { parent, name } => {
                let perm = ctx.umask.apply(perm);
                self.create_entry(ctx, parent, &name, NodeKind::directory(parent), perm)?;
                Ok(())
            }
        }
    }

    fn mkdir_all(&mut self, ctx: &OpContext<'_>, path: &str, perm: u32) -> KindResult<()> {
        let platform = ctx.config.platform;
        let mut prefix = String::new();
        if path.starts_with(|c: char| platform.is_separator(c)) {
            prefix.push('/');
        }
        for part in path
            .split(|c: char| platform.is_separator(c))
            .filter(|part| !part.is_empty())
        {
            if !prefix.is_empty() && !prefix.ends_with('/') {
                prefix.push('/');
            }
            prefix.push_str(part);
            match self.lookup(ctx, &prefix, true)? {
                Lookup::Found(resolved) => {
                    if !self.store.get(resolved.node)?.is_dir() {
                        return Err(FsErrorKind::NotADirectory);
                    }
                }
                Lookup::Missing { parent, name } => {
                    let perm = ctx.umask.apply(perm);
                    self.create_entry(ctx, parent, &name, NodeKind::directory(parent), perm)?;
                }
            }
        }
        Ok(())
    }

    fn remove(&mut self, ctx: &OpContext<'_>, path: &str) -> KindResult<()> {
        if path.is_empty() {
            return Err(FsErrorKind::NotFound);
        }
        if ends_in_dot(path, ctx.config.platform) {
            return Err(FsErrorKind::InvalidArgument);
        }
        let resolved = self.resolve(ctx, path, false)?;
        let Some((parent, name)) = resolved.parent else {
            return Err(FsErrorKind::InvalidArgument);
        };
        let node = self.store.get(resolved.node)?;
        if node.children().is_some_and(|children| !children.is_empty()) {
            return Err(FsErrorKind::DirNotEmpty);
        }
        self.require(ctx, parent, Access::WRITE | Access::EXEC)?;
        self.store.unlink_child(parent, &name)?;
        Ok(())
    }

    fn remove_all(&mut self, ctx: &OpContext<'_>, path: &str) -> KindResult<()> {
        if path.is_empty() {
            return Ok(());
        }
        if ends_in_dot(path, ctx.config.platform) {
            return Err(FsErrorKind::InvalidArgument);
        }
        let resolved = match self.lookup(ctx, path, false) {
            Ok(Lookup::Found(resolved)) => resolved,
            Ok(Lookup::Missing { .. }) | Err(FsErrorKind::NotFound) => return Ok(()),
            Err(kind) => return Err(kind),
        };
        match resolved.parent {
            Some((parent, name)) => {
                self.require(ctx, parent, Access::WRITE | Access::EXEC)?;
                self.remove_tree(ctx, resolved.node)?;
                self.store.unlink_child(parent, &name)?;
            }
            // Root of the view: empty it but keep it
            None => self.remove_tree(ctx, resolved.node)?,
        }
        Ok(())
    }

    fn remove_tree(&mut self, ctx: &OpContext<'_>, dir: NodeId) -> KindResult<()> {
        let entries: Vec<(String, NodeId)> = match self.store.get(dir)?.children() {
            Some(children) => children.iter().map(|(name, id)| (name.clone(), *id)).collect(),
            None => return Ok(()),
        };
        if entries.is_empty() {
            return Ok(());
        }
        self.require(ctx, dir, Access::WRITE | Access::EXEC)?;
        for (name, child) in entries {
            self.remove_tree(ctx, child)?;
            self.store.unlink_child(dir, &name)?;
        }
        Ok(())
    }

    fn rename(&mut self, ctx: &OpContext<'_>, old: &str, new: &str) -> KindResult<()> {
        let platform = ctx.config.platform;
        if ends_in_dot(old, platform) || ends_in_dot(new, platform) {
            return Err(FsErrorKind::InvalidArgument);
        }
        let src = self.resolve(ctx, old, false)?;
        let Some((src_parent, src_name)) = src.parent else {
            return Err(FsErrorKind::InvalidArgument);
        };
        let src_is_dir = self.store.get(src.node)?.is_dir();

        let (dst_parent, dst_name, replace) = match self.lookup(ctx, new, false)? {
            Lookup::Found(dst) => {
                // Same entry, or another hard link to the same file
                if dst.node == src.node {
                    return Ok(());
                }
                let dst_is_dir = self.store.get(dst.node)?.is_dir();
                match (src_is_dir, dst_is_dir) {
                    (_, true) => return Err(FsErrorKind::AlreadyExists),
                    (true, false) => return Err(FsErrorKind::NotADirectory),
                    (false, false) => {}
                }
                let (parent, name) = dst.parent.ok_or(FsErrorKind::InvalidArgument)?;
                (parent, name, true)
            }
            Lookup::Missing { parent, name } => (parent, name, false),
        };
        if self.store.get(dst_parent)?.nlink == 0 {
            return Err(FsErrorKind::NotFound);
        }

        if src_is_dir && self.store.is_within(dst_parent, src.node) {
            return Err(FsErrorKind::InvalidArgument);
        }
        self.require(ctx, src_parent, Access::WRITE | Access::EXEC)?;
        if dst_parent != src_parent {
            self.require(ctx, dst_parent, Access::WRITE | Access::EXEC)?;
        }

        if replace {
            self.store.unlink_child(dst_parent, &dst_name)?;
        }
        self.store.move_entry(src_parent, &src_name, dst_parent, &dst_name)
    }

    fn link(&mut self, ctx: &OpContext<'_>, old: &str, new: &str) -> KindResult<()> {
        let src = self.resolve(ctx, old, false)?;
        if self.store.get(src.node)?.is_dir() {
            return Err(FsErrorKind::NotPermitted);
        }
        match self.lookup(ctx, new, false)? {
            Lookup::Found(_) => Err(FsErrorKind::AlreadyExists),
            Lookup::Missing { parent, name } => {
                if self.store.get(parent)?.nlink == 0 {
                    return Err(FsErrorKind::NotFound);
                }
                self.require(ctx, parent, Access::WRITE | Access::EXEC)?;
                self.store.link_child(parent, &name, src.node)
            }
        }
    }

    fn symlink(&mut self, ctx: &OpContext<'_>, target: &str, link: &str) -> KindResult<()> {
        match self.lookup(ctx, link, false)? {
            Lookup::Found(_) => Err(FsErrorKind::AlreadyExists),
            Lookup::Missing { parent, name } => {
                let kind = NodeKind::Symlink {
                    target: target.to_string(),
                };
                self.create_entry(ctx, parent, &name, kind, 0o777)?;
                Ok(())
            }
        }
    }

    fn readlink(&self, ctx: &OpContext<'_>, path: &str) -> KindResult<String> {
        let resolved = self.resolve(ctx, path, false)?;
        self.store
            .get(resolved.node)?
            .symlink_target()
            .map(str::to_string)
            .ok_or(FsErrorKind::InvalidArgument)
    }

    fn eval_symlinks(&self, ctx: &OpContext<'_>, path: &str) -> KindResult<String> {
        let resolved = self.resolve(ctx, path, true)?;
        if self.store.get(resolved.node)?.is_dir() {
            return self
                .store
                .path_of(resolved.node, self.root)
                .ok_or(FsErrorKind::NotFound);
        }
        let (parent, name) = resolved.parent.ok_or(FsErrorKind::NotFound)?;
        let dir = self
            .store
            .path_of(parent, self.root)
            .ok_or(FsErrorKind::NotFound)?;
        Ok(crate::path::join(&dir, &name))
    }

    fn metadata(&self, ctx: &OpContext<'_>, path: &str, follow: bool) -> KindResult<Metadata> {
        let resolved = self.resolve(ctx, path, follow)?;
        let name = base_name(path, ctx.config.platform);
        Ok(self.store.get(resolved.node)?.metadata(&name))
    }

    fn chmod_node(&mut self, ctx: &OpContext<'_>, id: NodeId, perm: u32) -> KindResult<()> {
        let node = self.store.get_mut(id)?;
        if !permissions::may_change_metadata(&ctx.config.security, node.owner(), &ctx.user) {
            return Err(FsErrorKind::NotPermitted);
        }
        node.perm = perm & 0o7777;
        node.touch_changed();
        Ok(())
    }

    fn chown_node(&mut self, ctx: &OpContext<'_>, id: NodeId, uid: u32, gid: u32) -> KindResult<()> {
        let policy = &ctx.config.security;
        let node = self.store.get_mut(id)?;
        // Non-root owners may only move the file between their own groups
        let permitted = !policy.enforce_posix_permissions
            || (policy.root_bypass_permissions && ctx.user.is_root())
            || (ctx.user.uid == node.uid && uid == node.uid && ctx.user.in_group(gid));
        if !permitted {
            return Err(FsErrorKind::NotPermitted);
        }
        node.uid = uid;
        node.gid = gid;
        node.touch_changed();
        Ok(())
    }

    fn chtimes_node(
        &mut self,
        ctx: &OpContext<'_>,
        id: NodeId,
        atime: SystemTime,
        mtime: SystemTime,
    ) -> KindResult<()> {
        let node = self.store.get_mut(id)?;
        if !permissions::may_change_metadata(&ctx.config.security, node.owner(), &ctx.user) {
            return Err(FsErrorKind::NotPermitted);
        }
        node.times.atime = atime;
        node.times.mtime = mtime;
        node.touch_changed();
        Ok(())
    }

    fn truncate(&mut self, ctx: &OpContext<'_>, path: &str, size: i64) -> KindResult<()> {
        if size < 0 {
            return Err(FsErrorKind::InvalidArgument);
        }
        let resolved = self.resolve(ctx, path, true)?;
        if self.store.get(resolved.node)?.is_dir() {
            return Err(FsErrorKind::IsADirectory);
        }
        self.require(ctx, resolved.node, Access::WRITE)?;
        resize(self.store.get_mut(resolved.node)?, size)
    }

    fn open(&mut self, ctx: &OpContext<'_>, path: &str, opts: &OpenOptions) -> KindResult<HandleId> {
        let write = opts.wants_write();
        let read = opts.read || !write;
        let exclusive = opts.create && opts.exclusive;

        // An exclusive create must not follow a final symlink, dangling or not
        let node = match self.lookup(ctx, path, !exclusive)? {
            Lookup::Found(resolved) => {
                if exclusive {
                    return Err(FsErrorKind::AlreadyExists);
                }
                let is_dir = self.store.get(resolved.node)?.is_dir();
                if is_dir && write {
                    return Err(FsErrorKind::IsADirectory);
                }
                if read {
                    self.require(ctx, resolved.node, Access::READ)?;
                }
                if write {
                    self.require(ctx, resolved.node, Access::WRITE)?;
                    if opts.truncate {
                        resize(self.store.get_mut(resolved.node)?, 0)?;
                    }
                }
                resolved.node
            }
            Lookup::Missing { parent, name } => {
                if !opts.create {
                    return Err(FsErrorKind::NotFound);
                }
                let kind = NodeKind::File { data: Vec::new() };
                self.create_entry(ctx, parent, &name, kind, ctx.umask.apply(opts.mode))?
            }
        };

        let is_dir = self.store.get(node)?.is_dir();
        self.store.open_ref(node)?;
        Ok(self
            .handles
            .insert(Handle::new(node, path, is_dir, read, write, opts.append)))
    }

    pub(crate) fn close(&mut self, id: HandleId) -> KindResult<()> {
        let handle = self.handles.remove(id)?;
        self.store.close_ref(handle.node);
        trace!(handle = id.0, "closed handle");
        Ok(())
    }

    /// Read at `offset`, or at the cursor (advancing it) when `offset` is `None`
    pub(crate) fn read(
        &mut self,
        ctx: &OpContext<'_>,
        id: HandleId,
        buf: &mut [u8],
        offset: Option<i64>,
    ) -> KindResult<usize> {
        let State { store, handles, .. } = self;
        let handle = handles.get_mut(id)?;
        if offset.is_some_and(|off| off < 0) {
            return Err(FsErrorKind::NegativeOffset);
        }
        if handle.is_dir {
            return Err(if ctx.windows() {
                FsErrorKind::BadFileDescriptor
            } else {
                FsErrorKind::IsADirectory
            });
        }
        if !handle.read {
            return Err(FsErrorKind::BadFileDescriptor);
        }
        let node = store.get(handle.node)?;
        let NodeKind::File { data } = &node.kind else {
            return Err(FsErrorKind::InvalidArgument);
        };

        let pos = offset.unwrap_or(handle.cursor);
        let n = copy_out(data, pos, buf);
        if offset.is_none() {
            handle.cursor += n as i64;
        }
        Ok(n)
    }

    /// Write at `offset`, or at the cursor (advancing it) when `offset` is `None`
    pub(crate) fn write(
        &mut self,
        id: HandleId,
        buf: &[u8],
        offset: Option<i64>,
    ) -> KindResult<usize> {
        let State { store, handles, .. } = self;
        let handle = handles.get_mut(id)?;
        if offset.is_some() && handle.append {
            return Err(FsErrorKind::InvalidArgument);
        }
        if offset.is_some_and(|off| off < 0) {
            return Err(FsErrorKind::NegativeOffset);
        }
        if !handle.write {
            return Err(FsErrorKind::BadFileDescriptor);
        }
        let node = store.get_mut(handle.node)?;
        let NodeKind::File { data } = &mut node.kind else {
            return Err(FsErrorKind::IsADirectory);
        };
        if buf.is_empty() {
            return Ok(0);
        }

        let pos = match offset {
            Some(off) => off,
            None if handle.append => data.len() as i64,
            None => handle.cursor,
        };
        let start = usize::try_from(pos).map_err(|_| FsErrorKind::InvalidArgument)?;
        let end = start.checked_add(buf.len()).ok_or(FsErrorKind::InvalidArgument)?;
        if end > data.len() {
            set_len(data, end)?;
        }
        data[start..end].copy_from_slice(buf);
        node.touch_modified();

        if offset.is_none() {
            handle.cursor = end as i64;
        }
        Ok(buf.len())
    }

    pub(crate) fn seek(
        &mut self,
        ctx: &OpContext<'_>,
        id: HandleId,
        offset: i64,
        whence: Whence,
    ) -> KindResult<i64> {
        let State { store, handles, .. } = self;
        let handle = handles.get_mut(id)?;
        if handle.is_dir {
            if offset != 0 {
                return Err(FsErrorKind::InvalidArgument);
            }
            if whence == Whence::Start {
                handle.listing = None;
            }
            return Ok(0);
        }

        let base = match whence {
            Whence::Start => 0,
            Whence::Current => handle.cursor,
            Whence::End => store.get(handle.node)?.len() as i64,
        };
        let pos = base.checked_add(offset).ok_or(FsErrorKind::InvalidArgument)?;
        if pos < 0 {
            return Err(if ctx.windows() {
                FsErrorKind::NegativeSeek
            } else {
                FsErrorKind::InvalidArgument
            });
        }
        handle.cursor = pos;
        Ok(pos)
    }

    /// Seek with a raw `lseek` whence; Windows treats unknown values as start
    pub(crate) fn seek_raw(
        &mut self,
        ctx: &OpContext<'_>,
        id: HandleId,
        offset: i64,
        whence: i32,
    ) -> KindResult<i64> {
        self.handles.get(id)?;
        let whence = match Whence::from_raw(whence) {
            Some(whence) => whence,
            None if ctx.windows() => Whence::Start,
            None => return Err(FsErrorKind::InvalidArgument),
        };
        self.seek(ctx, id, offset, whence)
    }

    pub(crate) fn truncate_handle(
        &mut self,
        ctx: &OpContext<'_>,
        id: HandleId,
        size: i64,
    ) -> KindResult<()> {
        let handle = self.handles.get(id)?;
        if size < 0 {
            return Err(FsErrorKind::InvalidArgument);
        }
        if !handle.write {
            return Err(if ctx.windows() {
                FsErrorKind::PermissionDenied
            } else {
                FsErrorKind::InvalidArgument
            });
        }
        let node = handle.node;
        resize(self.store.get_mut(node)?, size)
    }

    pub(crate) fn read_dir(&mut self, id: HandleId, n: isize) -> KindResult<Vec<DirEntry>> {
        let State { store, handles, .. } = self;
        let handle = handles.get_mut(id)?;
        if !handle.is_dir {
            return Err(FsErrorKind::NotADirectory);
        }
        if handle.listing.is_none() {
            let dir = store.get(handle.node)?;
            let children = dir.children().ok_or(FsErrorKind::NotADirectory)?;
            let entries = children
                .iter()
                .filter_map(|(name, child)| {
                    store.get(*child).ok().map(|node| DirEntry {
                        name: name.clone(),
                        metadata: node.metadata(name),
                    })
                })
                .collect();
            handle.listing = Some(Listing::new(entries));
        }
        Ok(handle.listing.get_or_insert_with(Listing::default).take(n))
    }

    pub(crate) fn handle_node(&self, id: HandleId) -> KindResult<NodeId> {
        Ok(self.handles.get(id)?.node)
    }

    pub(crate) fn stat_handle(&self, ctx: &OpContext<'_>, id: HandleId) -> KindResult<Metadata> {
        let handle = self.handles.get(id)?;
        let name = base_name(&handle.name, ctx.config.platform);
        Ok(self.store.get(handle.node)?.metadata(&name))
    }

    pub(crate) fn chmod_handle(&mut self, ctx: &OpContext<'_>, id: HandleId, perm: u32) -> KindResult<()> {
        let node = self.handle_node(id)?;
        self.chmod_node(ctx, node, perm)
    }

    pub(crate) fn chown_handle(
        &mut self,
        ctx: &OpContext<'_>,
        id: HandleId,
        uid: u32,
        gid: u32,
    ) -> KindResult<()> {
        let node = self.handle_node(id)?;
        self.chown_node(ctx, node, uid, gid)
    }

    /// Make the handle's directory the working directory
    pub(crate) fn chdir_handle(&mut self, id: HandleId) -> KindResult<()> {
        let node_id = self.handle_node(id)?;
        let node = self.store.get(node_id)?;
        if !node.is_dir() {
            return Err(FsErrorKind::NotADirectory);
        }
        if node.nlink == 0 {
            return Err(FsErrorKind::NotFound);
        }
        self.cwd = node_id;
        Ok(())
    }
}

fn resize(node: &mut Node, size: i64) -> KindResult<()> {
    let len = usize::try_from(size).map_err(|_| FsErrorKind::InvalidArgument)?;
    match &mut node.kind {
        NodeKind::File { data } => set_len(data, len)?,
        NodeKind::Directory { .. } => return Err(FsErrorKind::IsADirectory),
        NodeKind::Symlink { .. } => return Err(FsErrorKind::InvalidArgument),
    }
    node.touch_modified();
    Ok(())
}

/// Zero-filling resize that fails instead of aborting when memory runs out
fn set_len(data: &mut Vec<u8>, len: usize) -> KindResult<()> {
    if len > data.len() {
        data.try_reserve(len - data.len()).map_err(|_| FsErrorKind::NoSpace)?;
    }
    data.resize(len, 0);
    Ok(())
}

fn copy_out(data: &[u8], pos: i64, buf: &mut [u8]) -> usize {
    let Ok(start) = usize::try_from(pos) else {
        return 0;
    };
    if start >= data.len() {
        return 0;
    }
    let end = std::cmp::min(start + buf.len(), data.len());
    let n = end - start;
    buf[..n].copy_from_slice(&data[start..end]);
    n
}
