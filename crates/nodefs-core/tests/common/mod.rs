// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

#![allow(dead_code)]

use std::sync::Once;

use nodefs_core::{FsConfig, MemFs};

static TRACING: Once = Once::new();

/// Install a test subscriber once per binary; `RUST_LOG` selects the level
pub fn init_tracing() {
    TRACING.call_once(|| {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_test_writer()
            .try_init();
    });
}

pub fn create_test_fs() -> MemFs {
    init_tracing();
    MemFs::new(FsConfig::default()).expect("Failed to create filesystem")
}

pub fn create_windows_fs() -> MemFs {
    init_tracing();
    MemFs::new(FsConfig::windows()).expect("Failed to create filesystem")
}
