// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for keter-core.

use std::time::Duration;

use thiserror::Error;

/// Supervisor errors.
///
/// During initial bring-up every variant except [`Error::DbUnavailable`] is
/// fatal to the application. During a reload the same variants are downgraded:
/// the new incarnation is rolled back and the old one keeps serving.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The bundle archive could not be read or unpacked.
    #[error("Bundle IO error: {0}")]
    BundleIo(#[from] std::io::Error),

    /// A tar entry tried to escape the extraction root.
    #[error("Unsafe path in bundle: {entry}")]
    BundleUnsafe {
        /// The offending entry path as recorded in the archive.
        entry: String,
    },

    /// The working-directory allocator refused.
    #[error("Failed to allocate working directory: {0}")]
    TempDirFailed(#[source] std::io::Error),

    /// The bundle contains no `config/keter.yaml`.
    #[error("Bundle has no config/keter.yaml")]
    ConfigMissing,

    /// `config/keter.yaml` could not be parsed.
    #[error("Malformed config file: {0}")]
    ConfigMalformed(String),

    /// The router could not lease a port.
    #[error("No port available: {0}")]
    PortExhausted(String),

    /// The process tracker could not start the child.
    #[error("Failed to spawn process: {0}")]
    ChildSpawnFailed(String),

    /// The child never accepted a TCP connection within the probe deadline.
    #[error("Process did not accept connections on port {port} within {deadline:?}")]
    ProbeTimeout {
        /// Port the child was expected to listen on.
        port: u16,
        /// Total time the prober waited.
        deadline: Duration,
    },

    /// The database provisioner failed. Never fatal: the child is launched
    /// without its PG* environment instead.
    #[error("Database provisioning unavailable: {0}")]
    DbUnavailable(String),
}

/// Result type using the keter-core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
