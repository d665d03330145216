// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process tracking contract.
//!
//! Child processes are launched and reaped by an external process supervisor
//! consumed through this interface. The supervisor core never touches PIDs
//! directly; it holds opaque [`ChildHandle`]s and asks the tracker to
//! terminate them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{Error, Result};

/// Everything needed to launch one child process.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// Account to run the child under, if the host drops privileges.
    pub owner_uid: Option<u32>,
    /// Absolute path of the executable inside the working tree.
    pub exec: PathBuf,
    /// Working directory for the child.
    pub work_dir: PathBuf,
    /// Command-line arguments.
    pub args: Vec<String>,
    /// Environment variables, complete (not inherited).
    pub env: HashMap<String, String>,
}

/// Handle for a launched child process.
#[derive(Debug, Clone)]
pub struct ChildHandle {
    /// Tracker-assigned identifier for this launch.
    pub handle_id: String,
    /// When the child was started.
    pub started_at: DateTime<Utc>,
}

/// External process supervisor consumed by the app supervisor.
#[async_trait]
pub trait ProcessTracker: Send + Sync {
    /// Launch a child process.
    async fn run(&self, spec: &SpawnSpec) -> Result<ChildHandle>;

    /// Terminate a child. Terminating an already-dead child is a no-op.
    async fn terminate(&self, handle: &ChildHandle);
}

/// What a [`MockTracker`] child does after launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Bind the `PORT` from the injected environment and accept connections
    /// until terminated, like a healthy web app.
    Listen,
    /// Never bind anything, like a child that crashed right after exec.
    ExitImmediately,
    /// Fail the launch itself.
    FailSpawn,
}

struct MockChild {
    stop: Arc<Notify>,
}

/// Mock [`ProcessTracker`] for tests.
///
/// Records every spawn so tests can assert on the injected environment, and
/// simulates children via the scripted [`MockBehavior`]s: the default
/// behavior applies to every launch unless a one-shot override was pushed.
pub struct MockTracker {
    default_behavior: MockBehavior,
    overrides: Mutex<Vec<MockBehavior>>,
    spawned: Mutex<Vec<SpawnSpec>>,
    running: Mutex<HashMap<String, MockChild>>,
    counter: AtomicU64,
}

impl MockTracker {
    /// Tracker whose children all behave like `behavior`.
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            default_behavior: behavior,
            overrides: Mutex::new(Vec::new()),
            spawned: Mutex::new(Vec::new()),
            running: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Queue a behavior for the next launch only.
    pub fn push_behavior(&self, behavior: MockBehavior) {
        self.overrides.lock().unwrap().push(behavior);
    }

    /// Every spawn spec seen so far, in launch order.
    pub fn spawned(&self) -> Vec<SpawnSpec> {
        self.spawned.lock().unwrap().clone()
    }

    /// Number of children currently running.
    pub fn running_count(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    /// Whether the child behind `handle` is still running.
    pub fn is_running(&self, handle: &ChildHandle) -> bool {
        self.running.lock().unwrap().contains_key(&handle.handle_id)
    }

    fn next_behavior(&self) -> MockBehavior {
        let mut overrides = self.overrides.lock().unwrap();
        if overrides.is_empty() {
            self.default_behavior
        } else {
            overrides.remove(0)
        }
    }
}

#[async_trait]
impl ProcessTracker for MockTracker {
    async fn run(&self, spec: &SpawnSpec) -> Result<ChildHandle> {
        let behavior = self.next_behavior();
        self.spawned.lock().unwrap().push(spec.clone());

        if behavior == MockBehavior::FailSpawn {
            return Err(Error::ChildSpawnFailed("mock spawn failure".to_string()));
        }

        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let handle = ChildHandle {
            handle_id: format!("mock-{id}"),
            started_at: Utc::now(),
        };

        let stop = Arc::new(Notify::new());
        if behavior == MockBehavior::Listen {
            let port: u16 = spec
                .env
                .get("PORT")
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| {
                    Error::ChildSpawnFailed("mock child launched without PORT".to_string())
                })?;
            let listener = TcpListener::bind(("127.0.0.1", port))
                .await
                .map_err(|e| Error::ChildSpawnFailed(e.to_string()))?;
            let stop = stop.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = stop.notified() => break,
                        conn = listener.accept() => {
                            if conn.is_err() {
                                break;
                            }
                        }
                    }
                }
                debug!(port, "Mock child stopped listening");
            });
        }

        self.running
            .lock()
            .unwrap()
            .insert(handle.handle_id.clone(), MockChild { stop });

        Ok(handle)
    }

    async fn terminate(&self, handle: &ChildHandle) {
        if let Some(child) = self.running.lock().unwrap().remove(&handle.handle_id) {
            // notify_one stores a permit, so a listener task that has not
            // reached its select yet still observes the stop.
            child.stop.notify_one();
        }
    }
}
