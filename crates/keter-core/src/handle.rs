// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Application command handle.

use tokio::sync::mpsc;

use crate::supervisor::Command;

/// Cheap, shareable command surface for one supervised application.
///
/// Both operations post to the supervisor's mailbox and return immediately;
/// outcomes are observed through the routing table, the logs, and the
/// supervisor's exit callback. Posting to a dead application is a no-op.
#[derive(Debug, Clone)]
pub struct AppHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl AppHandle {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { commands }
    }

    /// Ask the supervisor to re-read the bundle and cut over to it.
    pub fn reload(&self) {
        let _ = self.commands.send(Command::Reload);
    }

    /// Ask the supervisor to shut the application down.
    pub fn terminate(&self) {
        let _ = self.commands.send(Command::Terminate);
    }
}
