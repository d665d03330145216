// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Working-directory allocation.
//!
//! Every bundle incarnation lives in its own working tree. Trees are not
//! tied to any RAII guard: they outlive the allocation call and are deleted
//! explicitly, either eagerly on a failed bring-up or by the delayed
//! retirement task after a reload or terminate.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Allocator of per-incarnation working directories.
pub trait ScratchAllocator: Send + Sync {
    /// Create a fresh, empty, uniquely named directory for `app_id`.
    fn create(&self, app_id: &str) -> Result<PathBuf>;
}

/// [`ScratchAllocator`] handing out uniquely suffixed directories under a
/// fixed root.
#[derive(Debug, Clone)]
pub struct TempScratch {
    root: PathBuf,
}

impl TempScratch {
    /// Allocator rooted at `root`; the root is created on first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory all working trees are created under.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ScratchAllocator for TempScratch {
    fn create(&self, app_id: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.root).map_err(Error::TempDirFailed)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{app_id}-"))
            .tempdir_in(&self.root)
            .map_err(Error::TempDirFailed)?;
        Ok(dir.keep())
    }
}
