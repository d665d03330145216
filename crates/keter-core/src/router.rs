// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Routing table contract.
//!
//! The reverse proxy in front of every application is driven through this
//! interface: a key-value store from virtual hostname to routing target plus
//! a lease pool of local TCP ports. `add_entry` is an upsert with
//! last-writer-wins semantics per key, which is what makes the zero-downtime
//! reload cut-over work: entries shared between the old and new incarnation
//! silently move to the new one.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Where a virtual hostname is routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// Reverse-proxy to a local port.
    Port(u16),
    /// Serve files from a document root.
    Static(PathBuf),
    /// Answer with a redirect to a URL.
    Redirect(String),
}

/// The routing table and port pool shared by all applications.
#[async_trait]
pub trait Router: Send + Sync {
    /// Lease a free local port for a child process to bind.
    async fn reserve_port(&self) -> Result<u16>;

    /// Insert or overwrite the target for a virtual hostname.
    async fn add_entry(&self, host: &str, target: RouteTarget);

    /// Delete the entry for a virtual hostname, if any.
    async fn remove_entry(&self, host: &str);

    /// Return a leased port to the pool.
    async fn release_port(&self, port: u16);
}

/// In-memory [`Router`] implementation.
///
/// Leased ports are real OS-assigned free ports so that tests can bind them
/// and the health prober can connect to something. State is inspectable,
/// which is what the integration tests are built on.
#[derive(Debug, Default)]
pub struct MemoryRouter {
    entries: Mutex<HashMap<String, RouteTarget>>,
    leased: Mutex<HashSet<u16>>,
}

impl MemoryRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current target for a hostname.
    pub fn target_for(&self, host: &str) -> Option<RouteTarget> {
        self.entries.lock().unwrap().get(host).cloned()
    }

    /// Snapshot of the whole routing table.
    pub fn entries(&self) -> HashMap<String, RouteTarget> {
        self.entries.lock().unwrap().clone()
    }

    /// Ports currently leased out.
    pub fn leased_ports(&self) -> HashSet<u16> {
        self.leased.lock().unwrap().clone()
    }
}

#[async_trait]
impl Router for MemoryRouter {
    async fn reserve_port(&self) -> Result<u16> {
        // Ask the OS for a free port and hand it out unbound; the child is
        // expected to bind it shortly after.
        let listener = std::net::TcpListener::bind("127.0.0.1:0")
            .map_err(|e| Error::PortExhausted(e.to_string()))?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::PortExhausted(e.to_string()))?
            .port();
        drop(listener);
        self.leased.lock().unwrap().insert(port);
        Ok(port)
    }

    async fn add_entry(&self, host: &str, target: RouteTarget) {
        self.entries.lock().unwrap().insert(host.to_string(), target);
    }

    async fn remove_entry(&self, host: &str) {
        self.entries.lock().unwrap().remove(host);
    }

    async fn release_port(&self, port: u16) {
        self.leased.lock().unwrap().remove(&port);
    }
}
