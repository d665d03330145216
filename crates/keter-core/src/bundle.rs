// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bundle extraction.
//!
//! Unpacks a gzip-compressed tar archive into a freshly allocated working
//! tree. Only regular files and directories are materialized; symlinks,
//! hardlinks, devices and other entry types are skipped. Every entry path is
//! sanitized before any filesystem operation so a hostile archive cannot
//! write outside its extraction root.
//!
//! When an owner is supplied, each created directory is chowned as soon as it
//! exists and each file descriptor is chowned immediately after open, before
//! the first byte of content is written. Descriptors are opened with
//! O_CLOEXEC (the Rust standard library default), so a later child `exec`
//! does not inherit them.

use std::fs::{File, OpenOptions, Permissions};
use std::io::{self, ErrorKind};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use nix::unistd::{Gid, Uid, chown, fchown};
use tar::Archive;
use tracing::debug;

use crate::error::{Error, Result};

/// Filesystem ownership applied to everything the extractor creates.
///
/// The uid doubles as the account the child process is later run under; the
/// gid is used only for ownership of the extracted tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    /// Numeric user id.
    pub uid: u32,
    /// Numeric group id.
    pub gid: u32,
}

/// Unpack `bundle` into `work_dir`.
///
/// `work_dir` must already exist and should be empty. On any failure the
/// partially extracted tree is removed recursively before the error is
/// surfaced; extraction is not resumable and the caller must allocate a
/// fresh working directory to retry.
pub async fn extract(bundle: &Path, work_dir: &Path, owner: Option<Owner>) -> Result<()> {
    let bundle = bundle.to_path_buf();
    let work_dir = work_dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let outcome = unpack_archive(&bundle, &work_dir, owner);
        if outcome.is_err() {
            // The tree is unusable; remove whatever landed before reporting.
            if let Err(e) = std::fs::remove_dir_all(&work_dir) {
                debug!(dir = %work_dir.display(), error = %e, "Failed to remove partial working tree");
            }
        }
        outcome
    })
    .await
    .map_err(|e| Error::BundleIo(io::Error::other(e)))?
}

fn unpack_archive(bundle: &Path, work_dir: &Path, owner: Option<Owner>) -> Result<()> {
    let file = File::open(bundle)?;
    let mut archive = Archive::new(GzDecoder::new(file));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw = entry.path()?.into_owned();

        let Some(rel) = sanitize_entry_path(&raw) else {
            return Err(Error::BundleUnsafe {
                entry: raw.display().to_string(),
            });
        };
        if rel.as_os_str().is_empty() {
            continue;
        }

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            create_dir_tree(work_dir, &rel, owner)?;
            continue;
        }
        if !kind.is_file() {
            debug!(entry = %raw.display(), entry_type = ?kind, "Skipping non-regular tar entry");
            continue;
        }

        if let Some(parent) = rel.parent() {
            create_dir_tree(work_dir, parent, owner)?;
        }

        let dest = work_dir.join(&rel);
        let mode = entry.header().mode().unwrap_or(0o644);
        let mut out = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&dest)?;
        if let Some(owner) = owner {
            // Ownership must be settled while the descriptor is still
            // exclusively held, before any content is visible.
            fchown(
                &out,
                Some(Uid::from_raw(owner.uid)),
                Some(Gid::from_raw(owner.gid)),
            )
            .map_err(io::Error::from)?;
        }
        // fchmod on the descriptor; the open(2) mode argument would be
        // masked by the process umask and lose bits like group write.
        out.set_permissions(Permissions::from_mode(mode))?;
        io::copy(&mut entry, &mut out)?;
    }

    Ok(())
}

/// Normalize a tar entry path, rejecting anything that is absolute or that
/// escapes the archive root through `..` components.
fn sanitize_entry_path(raw: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}

/// Create every missing directory on the way to `work_dir/rel`, chowning each
/// one it creates before anything can be written below it.
fn create_dir_tree(work_dir: &Path, rel: &Path, owner: Option<Owner>) -> Result<()> {
    let mut dir = work_dir.to_path_buf();
    for component in rel.components() {
        dir.push(component);
        match std::fs::create_dir(&dir) {
            Ok(()) => {
                if let Some(owner) = owner {
                    chown(
                        &dir,
                        Some(Uid::from_raw(owner.uid)),
                        Some(Gid::from_raw(owner.gid)),
                    )
                    .map_err(io::Error::from)?;
                }
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
