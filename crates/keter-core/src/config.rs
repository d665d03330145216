// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bundle configuration.
//!
//! Every bundle carries a `config/keter.yaml` describing what the unpacked
//! tree serves: at most one executable web app, any number of static-file
//! hosts, and any number of redirects. Loading normalizes the raw document
//! into [`BundleConfig`]; in particular, static-host roots are resolved
//! against the working tree and silently dropped if they point outside it.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::error::{Error, Result};

/// Location of the configuration document inside an unpacked bundle.
pub const CONFIG_FILE: &str = "config/keter.yaml";

/// Executable app settings from the configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSettings {
    /// Executable path, relative to the bundle's `config/` directory.
    pub exec: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Primary virtual hostname.
    pub host: String,
    /// Additional virtual hostnames, deduplicated.
    pub extra_hosts: BTreeSet<String>,
    /// Whether a database is provisioned and injected into the environment.
    pub postgres: bool,
    /// Whether `APPROOT` uses the https scheme.
    pub ssl: bool,
}

/// A virtual hostname serving files straight from the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticHost {
    /// Virtual hostname.
    pub host: String,
    /// Absolute document root inside the working tree.
    pub root: PathBuf,
}

/// A virtual hostname answered with a redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Virtual hostname to redirect away from.
    pub from: String,
    /// Target URL.
    pub to: String,
}

/// Normalized bundle configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleConfig {
    /// The executable web app, if the bundle has one.
    pub app: Option<AppSettings>,
    /// Static-file hosts that survived root sandboxing.
    pub static_hosts: Vec<StaticHost>,
    /// Redirect entries.
    pub redirects: Vec<Redirect>,
}

impl BundleConfig {
    /// Every virtual hostname this configuration claims in the routing table:
    /// the app's primary and extra hosts, static hosts, and redirect sources.
    pub fn route_set(&self) -> BTreeSet<String> {
        let mut hosts = BTreeSet::new();
        if let Some(app) = &self.app {
            hosts.insert(app.host.clone());
            hosts.extend(app.extra_hosts.iter().cloned());
        }
        hosts.extend(self.static_hosts.iter().map(|s| s.host.clone()));
        hosts.extend(self.redirects.iter().map(|r| r.from.clone()));
        hosts
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    host: Option<String>,
    exec: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    postgres: bool,
    #[serde(default)]
    ssl: bool,
    #[serde(rename = "extra-hosts", default)]
    extra_hosts: Vec<String>,
    #[serde(rename = "static-hosts", default)]
    static_hosts: Vec<RawStaticHost>,
    #[serde(default)]
    redirects: Vec<RawRedirect>,
}

#[derive(Debug, Deserialize)]
struct RawStaticHost {
    host: String,
    root: String,
}

#[derive(Debug, Deserialize)]
struct RawRedirect {
    from: String,
    to: String,
}

/// Read and normalize `work_dir/config/keter.yaml`.
///
/// Returns [`Error::ConfigMissing`] when the file is absent and
/// [`Error::ConfigMalformed`] when it does not parse or an app `exec` is
/// given without a `host`.
pub fn load(work_dir: &Path) -> Result<BundleConfig> {
    let path = work_dir.join(CONFIG_FILE);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Error::ConfigMissing),
        Err(e) => return Err(Error::BundleIo(e)),
    };

    let raw: RawConfig =
        serde_yaml::from_str(&text).map_err(|e| Error::ConfigMalformed(e.to_string()))?;

    let app = match raw.exec {
        Some(exec) => {
            let host = raw.host.ok_or_else(|| {
                Error::ConfigMalformed("exec given without a primary host".to_string())
            })?;
            Some(AppSettings {
                exec,
                args: raw.args,
                host,
                extra_hosts: raw.extra_hosts.into_iter().collect(),
                postgres: raw.postgres,
                ssl: raw.ssl,
            })
        }
        None => None,
    };

    let static_hosts = raw
        .static_hosts
        .into_iter()
        .filter_map(|s| match resolve_static_root(work_dir, &s.root) {
            Some(root) => Some(StaticHost { host: s.host, root }),
            None => {
                warn!(host = %s.host, root = %s.root, "Dropping static host with unsafe root");
                None
            }
        })
        .collect();

    let redirects = raw
        .redirects
        .into_iter()
        .map(|r| Redirect {
            from: r.from,
            to: r.to,
        })
        .collect();

    Ok(BundleConfig {
        app,
        static_hosts,
        redirects,
    })
}

/// Resolve a static-host root against `work_dir/config/` and collapse it.
/// Roots that are absolute or escape the working tree yield `None`.
fn resolve_static_root(work_dir: &Path, root: &str) -> Option<PathBuf> {
    let root = Path::new(root);
    if root.is_absolute() {
        return None;
    }
    let resolved = lexical_collapse(&work_dir.join("config").join(root))?;
    resolved.starts_with(work_dir).then_some(resolved)
}

/// Collapse `.` and `..` components without touching the filesystem.
/// Returns `None` when `..` would climb past the root.
fn lexical_collapse(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::Prefix(_) | Component::Normal(_) => {
                clean.push(component)
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return None;
                }
            }
        }
    }
    Some(clean)
}
