// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for keter-core integration tests.
//!
//! Provides a `TestHost` wiring the supervisor to in-memory collaborators
//! with millisecond timing, plus helpers to author tar.gz bundles on disk.

#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use tar::{Builder, EntryType, Header};
use tempfile::TempDir;

use keter_core::{
    AppHandle, AppOptions, AppSupervisor, Collaborators, DbInfo, MemoryRouter, MockBehavior,
    MockProvisioner, MockTracker, ProbeConfig, SupervisorTiming, TempScratch,
};

/// Everything an integration test needs to run one or more supervisors.
pub struct TestHost {
    pub router: Arc<MemoryRouter>,
    pub tracker: Arc<MockTracker>,
    pub db: Arc<MockProvisioner>,
    pub exits: Arc<AtomicUsize>,
    temp: TempDir,
    scratch_root: PathBuf,
}

impl TestHost {
    /// Host whose children listen like healthy web apps and whose database
    /// provisioner is down.
    pub fn new() -> Self {
        Self::build(MockBehavior::Listen, None)
    }

    /// Host with full control over child behavior and database availability.
    pub fn build(behavior: MockBehavior, db_info: Option<DbInfo>) -> Self {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let scratch_root = temp.path().join("incoming");
        let db = match db_info {
            Some(info) => MockProvisioner::new(info),
            None => MockProvisioner::unavailable(),
        };
        Self {
            router: Arc::new(MemoryRouter::new()),
            tracker: Arc::new(MockTracker::new(behavior)),
            db: Arc::new(db),
            exits: Arc::new(AtomicUsize::new(0)),
            temp,
            scratch_root,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            router: self.router.clone(),
            tracker: self.tracker.clone(),
            db: self.db.clone(),
            scratch: Arc::new(TempScratch::new(&self.scratch_root)),
        }
    }

    /// Millisecond timing so retirement windows elapse within the test.
    pub fn timing() -> SupervisorTiming {
        SupervisorTiming {
            probe: ProbeConfig {
                interval: Duration::from_millis(10),
                deadline: Duration::from_secs(2),
            },
            drain_window: Duration::from_millis(300),
            remove_window: Duration::from_millis(300),
        }
    }

    /// Spawn a supervisor for `bundle`, counting exits.
    pub fn spawn(&self, bundle: &Path) -> AppHandle {
        let exits = self.exits.clone();
        AppSupervisor::spawn(
            AppOptions {
                app_id: "test-app".to_string(),
                bundle: bundle.to_path_buf(),
                owner: None,
            },
            self.collaborators(),
            Self::timing(),
            move || {
                exits.fetch_add(1, Ordering::SeqCst);
            },
        )
    }

    /// Write (or overwrite) a bundle with the given `config/keter.yaml` and a
    /// stub executable at `config/app`.
    pub fn bundle(&self, name: &str, yaml: &str) -> PathBuf {
        let path = self.temp.path().join(name);
        write_bundle(
            &path,
            &[
                ("config/keter.yaml", 0o644, yaml.as_bytes()),
                ("config/app", 0o755, b"#!/bin/sh\n"),
            ],
        );
        path
    }

    /// Write (or overwrite) a bundle from raw entries.
    pub fn raw_bundle(&self, name: &str, entries: &[(&str, u32, &[u8])]) -> PathBuf {
        let path = self.temp.path().join(name);
        write_bundle(&path, entries);
        path
    }

    pub fn exit_count(&self) -> usize {
        self.exits.load(Ordering::SeqCst)
    }

    /// Working trees currently on disk under the scratch root.
    pub fn scratch_entries(&self) -> usize {
        match std::fs::read_dir(&self.scratch_root) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

/// Write a gzip-compressed tar archive of regular-file entries.
///
/// The name bytes are written into the header directly so tests can author
/// entries the builder API would refuse, e.g. traversal paths.
pub fn write_bundle(path: &Path, entries: &[(&str, u32, &[u8])]) {
    let file = File::create(path).unwrap();
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);
    for (name, mode, data) in entries {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(*mode);
        header.set_size(data.len() as u64);
        header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
        header.set_cksum();
        builder.append(&header, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// Route supervisor logs to the test writer, honoring `RUST_LOG`.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Poll `condition` every 10 ms until it holds or `timeout` elapses.
pub async fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Generous deadline for conditions driven by the supervisor task.
pub const WAIT: Duration = Duration::from_secs(5);
