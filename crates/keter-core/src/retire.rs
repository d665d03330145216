// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Delayed retirement of a superseded incarnation.
//!
//! After a reload cut-over or a terminate, the outgoing child and its working
//! tree are not torn down immediately: in-flight requests get a drain window
//! against the old child before it is killed, and the tree stays on disk for
//! a further window so the OS and the dying child can flush. The task is
//! fire-and-forget and not cancellable; the incarnation it refers to is
//! already out of the routing table, so running it to completion is always
//! safe.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, info, warn};

use crate::router::Router;
use crate::tracker::{ChildHandle, ProcessTracker};

/// The pieces of an incarnation that outlive its removal from the routing
/// table.
#[derive(Debug)]
pub(crate) struct Retiree {
    /// Working tree to delete at the end of the removal window.
    pub dir: PathBuf,
    /// Child to kill at the end of the drain window, if the incarnation ran one.
    pub child: Option<ChildHandle>,
    /// Port lease to release once the child is dead.
    pub port: Option<u16>,
}

/// Spawn the detached retirement task: kill the child after `drain_window`,
/// release its port, then delete the tree after a further `remove_window`.
pub(crate) fn schedule(
    router: Arc<dyn Router>,
    tracker: Arc<dyn ProcessTracker>,
    retiree: Retiree,
    drain_window: Duration,
    remove_window: Duration,
) {
    let task = async move {
        tokio::time::sleep(drain_window).await;
        if let Some(child) = &retiree.child {
            info!(child = %child.handle_id, "Terminating old process");
            tracker.terminate(child).await;
        }
        if let Some(port) = retiree.port {
            router.release_port(port).await;
        }

        tokio::time::sleep(remove_window).await;
        info!(dir = %retiree.dir.display(), "Removing old folder");
        if let Err(e) = tokio::fs::remove_dir_all(&retiree.dir).await {
            warn!(dir = %retiree.dir.display(), error = %e, "Failed to remove old folder");
        }
    };
    tokio::spawn(task.instrument(tracing::Span::current()));
}
