// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Keter Core - Per-Application Supervisor
//!
//! This crate is the supervisor core of the Keter web-app deployment manager.
//! Operators drop compressed bundles into a watched directory; the host
//! unpacks each bundle into an isolated working tree, launches the contained
//! executable behind a port-routed reverse proxy, and keeps it alive. One
//! supervisor task owns one application from the moment its bundle is
//! accepted until it is terminated.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Host (external)                              │
//! │        bundle watcher · CLI · app registry holding AppHandles        │
//! └─────────────────────────────────────────────────────────────────────┘
//!                │ AppSupervisor::spawn            │ reload / terminate
//!                ▼                                 ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      keter-core (this crate)                         │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌───────────────┐  │
//! │  │   Bundle   │  │   Config   │  │   Health   │  │  Supervisor   │  │
//! │  │ Extraction │  │   Loader   │  │   Probe    │  │ (mailbox task)│  │
//! │  └────────────┘  └────────────┘  └────────────┘  └───────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//!        │ add/remove entries,          │ run/terminate        │ get_info
//!        │ reserve/release ports        ▼                      ▼
//!        ▼                     ┌────────────────┐    ┌─────────────────┐
//! ┌────────────────┐           │ ProcessTracker │    │  DbProvisioner  │
//! │     Router     │           │   (external)   │    │   (external)    │
//! │   (external)   │           └────────────────┘    └─────────────────┘
//! └────────────────┘
//! ```
//!
//! The Router, the process supervisor, and the database provisioner are
//! consumed through traits; this crate ships in-memory implementations
//! ([`MemoryRouter`], [`MockTracker`], [`MockProvisioner`]) for embedding and
//! tests.
//!
//! # Lifecycle
//!
//! | Operation | Behavior |
//! |-----------|----------|
//! | Bring-up | Unpack, configure, lease a port, launch, health-gate, publish routes. Any failure tears the incarnation down and kills the app. |
//! | Reload | Stage the new incarnation completely while the old one serves; publish new routes, retract stale ones, retire the old incarnation after drain/removal windows. Any failure rolls back the new incarnation only. |
//! | Terminate | Retract all routes, retire the incarnation, exit. |
//!
//! Commands are processed strictly sequentially per app; independent apps are
//! fully concurrent.
//!
//! # Bundle format
//!
//! A gzip-compressed tar archive whose tree contains at least
//! `config/keter.yaml`:
//!
//! ```yaml
//! host: www.example.com        # primary hostname, required with exec
//! exec: app                    # executable, relative to config/
//! args: ["--production"]       # default []
//! ssl: false                   # APPROOT scheme
//! postgres: false              # provision a database, inject PG* env
//! extra-hosts: [example.com]
//! static-hosts:
//!   - host: static.example.com
//!     root: static             # relative to config/, sandboxed to the tree
//! redirects:
//!   - from: old.example.com
//!     to: https://www.example.com
//! ```
//!
//! # Modules
//!
//! - [`bundle`]: safe tar.gz extraction into the working tree
//! - [`config`]: `config/keter.yaml` parsing and normalization
//! - [`db`]: database provisioner contract
//! - [`error`]: error types
//! - [`handle`]: the application command handle
//! - [`probe`]: TCP readiness gate for launched children
//! - [`router`]: routing table contract and in-memory implementation
//! - [`scratch`]: working-directory allocation
//! - [`supervisor`]: the per-app state machine
//! - [`tracker`]: process tracking contract

#![deny(missing_docs)]

/// Safe extraction of gzip-compressed tar bundles.
pub mod bundle;

/// Bundle configuration parsing and normalization.
pub mod config;

/// Database provisioning contract.
pub mod db;

/// Error types for supervisor operations.
pub mod error;

/// Application command handle.
pub mod handle;

/// TCP readiness probing.
pub mod probe;

mod retire;

/// Routing table contract.
pub mod router;

/// Working-directory allocation.
pub mod scratch;

/// The per-application supervisor state machine.
pub mod supervisor;

/// Process tracking contract.
pub mod tracker;

pub use bundle::Owner;
pub use config::BundleConfig;
pub use db::{DbInfo, DbProvisioner, MockProvisioner};
pub use error::{Error, Result};
pub use handle::AppHandle;
pub use probe::ProbeConfig;
pub use router::{MemoryRouter, RouteTarget, Router};
pub use scratch::{ScratchAllocator, TempScratch};
pub use supervisor::{AppOptions, AppSupervisor, Collaborators, SupervisorTiming};
pub use tracker::{ChildHandle, MockBehavior, MockTracker, ProcessTracker, SpawnSpec};
