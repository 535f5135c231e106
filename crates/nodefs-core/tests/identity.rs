// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Ownership and permission enforcement driven by an identity manager

mod common;

use std::sync::Arc;

use common::init_tracing;
use nodefs_core::{
    Capabilities, Filesystem, FsConfig, FsErrorKind, IdentityManager, MemFs, MemIdentity,
    OpenOptions, ReadOnlyFs, Umask,
};

struct Harness {
    fs: MemFs,
    identity: Arc<MemIdentity>,
}

impl Harness {
    fn new() -> Self {
        init_tracing();
        let identity = Arc::new(MemIdentity::new());
        identity.add_group("staff", 50).expect("add staff");
        identity.add_group("audit", 60).expect("add audit");
        identity.add_user("alice", 1000, "staff").expect("add alice");
        identity.add_user("bob", 1001, "staff").expect("add bob");
        identity.add_user("eve", 1002, "audit").expect("add eve");
        let fs = MemFs::builder(FsConfig::default())
            .identity(identity.clone())
            .build()
            .expect("filesystem");
        fs.mkdir("/shared", 0o777).expect("mkdir shared");
        fs.chmod("/shared", 0o777).expect("open up shared");
        Self { fs, identity }
    }

    fn as_user(&self, name: &str) -> &MemFs {
        self.identity.set_user(name).expect("switch user");
        &self.fs
    }
}

#[test]
fn test_new_nodes_owned_by_current_user() {
    let h = Harness::new();
    let fs = h.as_user("alice");
    fs.write_file("/shared/report", b"q3", 0o640).expect("write");
    let meta = fs.stat("/shared/report").expect("stat");
    assert_eq!((meta.uid(), meta.gid()), (1000, 50));
    assert_eq!(meta.permissions(), 0o640);
    assert!(fs.capabilities().contains(Capabilities::IDENTITY_MGR));
}

#[test]
fn test_owner_group_other_bits() {
    let h = Harness::new();
    h.as_user("alice")
        .write_file("/shared/report", b"q3", 0o640)
        .expect("write");

    let bob = h.as_user("bob");
    assert_eq!(bob.read_file("/shared/report").expect("group read"), b"q3");
    assert_eq!(
        bob.open_file("/shared/report", OpenOptions::new().write(true))
            .map(|_| ())
            .expect_err("group write")
            .kind(),
        FsErrorKind::PermissionDenied
    );

    let eve = h.as_user("eve");
    assert_eq!(
        eve.read_file("/shared/report").expect_err("other read").kind(),
        FsErrorKind::PermissionDenied
    );

    h.identity.add_user_to_group("eve", "staff").expect("usermod");
    let eve = h.as_user("eve");
    assert_eq!(eve.read_file("/shared/report").expect("supplementary group"), b"q3");
}

#[test]
fn test_root_bypass() {
    let h = Harness::new();
    h.as_user("alice")
        .write_file("/shared/private", b"secret", 0o600)
        .expect("write");
    let root = h.as_user("root");
    assert_eq!(root.read_file("/shared/private").expect("root reads"), b"secret");
    root.chown("/shared/private", 1001, 50).expect("root chowns");
}

#[test]
fn test_root_bypass_can_be_disabled() {
    init_tracing();
    let identity = Arc::new(MemIdentity::new());
    let mut config = FsConfig::default();
    config.security.root_bypass_permissions = false;
    let fs = MemFs::builder(config)
        .identity(identity)
        .build()
        .expect("filesystem");
    fs.write_file("/locked", b"x", 0o644).expect("write");
    fs.chmod("/locked", 0o000).expect("chmod as owner");
    assert_eq!(
        fs.read_file("/locked").expect_err("no bypass").kind(),
        FsErrorKind::PermissionDenied
    );
}

#[test]
fn test_enforcement_can_be_disabled() {
    init_tracing();
    let identity = Arc::new(MemIdentity::new());
    identity.add_group("users", 100).expect("group");
    identity.add_user("guest", 2000, "users").expect("user");
    let mut config = FsConfig::default();
    config.security.enforce_posix_permissions = false;
    let fs = MemFs::builder(config)
        .identity(identity.clone())
        .build()
        .expect("filesystem");
    fs.mkdir("/root-only", 0o700).expect("mkdir");

    identity.set_user("guest").expect("switch");
    fs.write_file("/root-only/anything", b"", 0o600).expect("unchecked write");
    fs.chmod("/root-only", 0o755).expect("unchecked chmod");
}

#[test]
fn test_metadata_changes_need_ownership() {
    let h = Harness::new();
    h.as_user("alice")
        .write_file("/shared/doc", b"", 0o644)
        .expect("write");

    let bob = h.as_user("bob");
    assert_eq!(
        bob.chmod("/shared/doc", 0o666).expect_err("chmod").kind(),
        FsErrorKind::NotPermitted
    );
    let now = std::time::SystemTime::now();
    assert_eq!(
        bob.chtimes("/shared/doc", now, now).expect_err("chtimes").kind(),
        FsErrorKind::NotPermitted
    );

    let alice = h.as_user("alice");
    alice.chown("/shared/doc", 1000, 50).expect("keep uid, own group");
    assert_eq!(
        alice.chown("/shared/doc", 1000, 60).expect_err("foreign group").kind(),
        FsErrorKind::NotPermitted
    );
    assert_eq!(
        alice.chown("/shared/doc", 1001, 50).expect_err("give away").kind(),
        FsErrorKind::NotPermitted
    );
}

#[test]
fn test_search_permission_on_traversal() {
    let h = Harness::new();
    let alice = h.as_user("alice");
    alice.mkdir("/shared/vault", 0o700).expect("mkdir");
    alice.write_file("/shared/vault/key", b"k", 0o644).expect("write");

    let bob = h.as_user("bob");
    assert_eq!(
        bob.stat("/shared/vault/key").expect_err("no search").kind(),
        FsErrorKind::PermissionDenied
    );
    assert_eq!(
        bob.chdir("/shared/vault").expect_err("chdir").kind(),
        FsErrorKind::PermissionDenied
    );
    assert!(bob.stat("/shared/vault").is_ok());
}

#[test]
fn test_remove_needs_write_on_parent() {
    let h = Harness::new();
    let alice = h.as_user("alice");
    alice.mkdir("/shared/mine", 0o755).expect("mkdir");
    alice.write_file("/shared/mine/f", b"", 0o666).expect("write");

    let bob = h.as_user("bob");
    assert_eq!(
        bob.remove("/shared/mine/f").expect_err("remove").kind(),
        FsErrorKind::PermissionDenied
    );
    assert_eq!(
        bob.rename("/shared/mine/f", "/shared/stolen").expect_err("rename").kind(),
        FsErrorKind::PermissionDenied
    );
    assert_eq!(
        bob.remove_all("/shared/mine").expect_err("remove_all").kind(),
        FsErrorKind::PermissionDenied
    );
}

#[test]
fn test_chroot_requires_root_principal() {
    let h = Harness::new();
    let alice = h.as_user("alice");
    assert_eq!(
        alice.chroot("/shared").expect_err("non-root").kind(),
        FsErrorKind::NotPermitted
    );
    let root = h.as_user("root");
    root.chroot("/shared").expect("chroot");
    assert_eq!(root.getwd().expect("getwd"), "/");
}

#[test]
fn test_identity_lookups() {
    let identity = MemIdentity::new();
    identity.add_group("wheel", 10).expect("group");
    identity.add_user("admin", 500, "wheel").expect("user");
    assert_eq!(identity.lookup_user("admin").expect("lookup").gid, 10);
    assert_eq!(identity.lookup_group("wheel").expect("lookup").gid, 10);
    assert_eq!(
        identity.lookup_user("ghost").expect_err("missing").kind(),
        FsErrorKind::NotFound
    );
    assert_eq!(
        identity.add_user("other", 501, "nogroup").expect_err("no group").kind(),
        FsErrorKind::NotFound
    );
}

#[test]
fn test_shared_umask_between_instances() {
    init_tracing();
    let umask = Umask::new(0o022);
    let first = MemFs::builder(FsConfig::default())
        .umask(umask.clone())
        .build()
        .expect("first");
    let second = MemFs::builder(FsConfig::default())
        .umask(umask.clone())
        .build()
        .expect("second");
    first.set_umask(0o077);
    assert_eq!(second.umask(), 0o077);
    assert_eq!(umask.get(), 0o077);
    second.write_file("/f", b"", 0o666).expect("write");
    assert_eq!(second.stat("/f").expect("stat").permissions(), 0o600);
}

#[test]
fn test_read_only_wrapper_keeps_identity_view() {
    let h = Harness::new();
    h.as_user("alice")
        .write_file("/shared/ro", b"data", 0o600)
        .expect("write");
    let ro = ReadOnlyFs::new(h.fs.clone());
    h.identity.set_user("bob").expect("switch");
    assert_eq!(
        ro.read_file("/shared/ro").expect_err("still checked").kind(),
        FsErrorKind::PermissionDenied
    );
    assert!(ro.capabilities().contains(Capabilities::READ_ONLY | Capabilities::IDENTITY_MGR));
}
