// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Health probing.
//!
//! A freshly launched child is accepted as serving once it accepts a TCP
//! connection on its assigned port. The child is an arbitrary user-supplied
//! executable and may take any amount of time between spawn and listen, so
//! the prober retries under an overall deadline instead of checking once.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Probe timing.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Pause before each connection attempt.
    pub interval: Duration,
    /// Total time allowed before the child is declared not serving.
    pub deadline: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            deadline: Duration::from_secs(90),
        }
    }
}

/// Wait until something accepts TCP connections on `127.0.0.1:port`.
///
/// Returns `true` as soon as a connect succeeds within the deadline. The
/// connection is closed immediately; no protocol is spoken. Errors while
/// closing are logged and do not invalidate the success.
pub async fn wait_until_listening(port: u16, config: &ProbeConfig) -> bool {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let attempts = async {
        loop {
            tokio::time::sleep(config.interval).await;
            match TcpStream::connect(addr).await {
                Ok(mut stream) => {
                    if let Err(e) = stream.shutdown().await {
                        debug!(port, error = %e, "Error closing probe connection");
                    }
                    return;
                }
                Err(e) => {
                    debug!(port, error = %e, "Probe connect failed, retrying");
                }
            }
        }
    };

    tokio::time::timeout(config.deadline, attempts).await.is_ok()
}
