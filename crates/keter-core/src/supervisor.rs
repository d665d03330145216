// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The per-application supervisor.
//!
//! One supervisor task owns one application from bundle acceptance to
//! termination. All external interaction goes through a command mailbox with
//! exactly two messages, reload and terminate, processed strictly one at a
//! time; every piece of state lives on the task's stack, so no locks guard
//! the incarnation.
//!
//! ```text
//!                  ┌───────────────┐
//!                  │ Bootstrapping │
//!                  └───────┬───────┘
//!              bring-up ok │        bring-up failed
//!                          ▼              │
//!                  ┌───────────────┐      │
//!       ┌─────────▶│    Serving    │      │
//!       │          └───────┬───────┘      │
//!       │ reload ok /      │              │
//!       │ reload failed    │ terminate    │
//!       │          ┌───────┴───────┐      │
//!       └──────────│   Reloading   │      │
//!                  └───────────────┘      │
//!                          │              │
//!                          ▼              ▼
//!                  ┌─────────────────────────┐
//!                  │          Dead           │
//!                  └─────────────────────────┘
//! ```
//!
//! A reload stages the new incarnation completely (unpack, configure, lease a
//! port, launch, pass the health gate) before the routing table changes.
//! Publication order makes the cut-over atomic from the router's point of
//! view: new entries are upserted first, stale entries retracted after, and
//! the old incarnation is handed to the delayed retirement task. Any failure
//! while staging rolls back only the new incarnation's resources and the old
//! one keeps serving untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{Instrument, error, info, info_span, warn};

use crate::bundle::{self, Owner};
use crate::config::{self, AppSettings, BundleConfig};
use crate::db::DbProvisioner;
use crate::error::{Error, Result};
use crate::handle::AppHandle;
use crate::probe::{self, ProbeConfig};
use crate::retire::{self, Retiree};
use crate::router::{RouteTarget, Router};
use crate::scratch::ScratchAllocator;
use crate::tracker::{ChildHandle, ProcessTracker, SpawnSpec};

/// Mailbox commands understood by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    /// Re-read the bundle and cut over to the new incarnation.
    Reload,
    /// Retract all routes and shut the application down.
    Terminate,
}

/// Parameters for one supervised application.
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Identifier unique within the host; directory suffix and logging tag.
    pub app_id: String,
    /// Path of the compressed bundle. Re-read on every reload.
    pub bundle: PathBuf,
    /// Ownership applied to extracted files; the uid also runs the child.
    pub owner: Option<Owner>,
}

/// Shared handles to the host-wide collaborators.
#[derive(Clone)]
pub struct Collaborators {
    /// Routing table and port pool.
    pub router: Arc<dyn Router>,
    /// Child process launcher.
    pub tracker: Arc<dyn ProcessTracker>,
    /// Per-app database provisioner.
    pub db: Arc<dyn DbProvisioner>,
    /// Working-directory allocator.
    pub scratch: Arc<dyn ScratchAllocator>,
}

/// Supervisor timing knobs with the production defaults.
#[derive(Debug, Clone)]
pub struct SupervisorTiming {
    /// Health-gate timing for freshly launched children.
    pub probe: ProbeConfig,
    /// How long a superseded child keeps running so in-flight requests drain.
    pub drain_window: Duration,
    /// How long after the kill the old working tree stays on disk.
    pub remove_window: Duration,
}

impl Default for SupervisorTiming {
    fn default() -> Self {
        Self {
            probe: ProbeConfig::default(),
            drain_window: Duration::from_secs(20),
            remove_window: Duration::from_secs(60),
        }
    }
}

/// One live bundle incarnation. At most two exist per app, and only within
/// the reload cut-over window.
struct Deployment {
    dir: PathBuf,
    config: BundleConfig,
    child: Option<ChildHandle>,
    port: Option<u16>,
}

/// Entry point for supervising applications.
pub struct AppSupervisor;

impl AppSupervisor {
    /// Spawn the supervisor task for one application and return its handle.
    ///
    /// Bring-up happens on the spawned task; callers observe the outcome
    /// through the router, the logs, and `on_exit`, which is invoked exactly
    /// once when the supervisor dies, whether because bring-up failed or
    /// because the app was terminated. Dropping every [`AppHandle`] is
    /// equivalent to terminating.
    pub fn spawn<F>(
        options: AppOptions,
        collab: Collaborators,
        timing: SupervisorTiming,
        on_exit: F,
    ) -> AppHandle
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let span = info_span!("app", app = %options.app_id);
        let supervisor = Supervisor {
            app_id: options.app_id,
            bundle: options.bundle,
            owner: options.owner,
            collab,
            timing,
            rx,
            on_exit: Some(Box::new(on_exit)),
        };
        tokio::spawn(supervisor.run().instrument(span));
        AppHandle::new(tx)
    }
}

struct Supervisor {
    app_id: String,
    bundle: PathBuf,
    owner: Option<Owner>,
    collab: Collaborators,
    timing: SupervisorTiming,
    rx: mpsc::UnboundedReceiver<Command>,
    on_exit: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Supervisor {
    async fn run(mut self) {
        let deployment = match self.stage().await {
            Ok(deployment) => deployment,
            Err(e) => {
                error!(error = %e, "Application failed to start");
                self.exit();
                return;
            }
        };
        self.publish_routes(&deployment).await;
        self.serve(deployment).await;
        self.exit();
    }

    /// The Serving state: wait on the mailbox, one command at a time.
    async fn serve(&mut self, mut current: Deployment) {
        loop {
            match self.rx.recv().await {
                Some(Command::Reload) => {
                    info!(bundle = %self.bundle.display(), "Reloading from bundle");
                    match self.stage().await {
                        Ok(incoming) => {
                            // Publish before retracting: shared keys move to
                            // the new incarnation atomically, and hosts only
                            // the old incarnation served are retracted once
                            // the new set is live.
                            self.publish_routes(&incoming).await;
                            let outgoing_hosts = current.config.route_set();
                            let incoming_hosts = incoming.config.route_set();
                            for host in outgoing_hosts.difference(&incoming_hosts) {
                                self.collab.router.remove_entry(host).await;
                            }
                            let outgoing = std::mem::replace(&mut current, incoming);
                            self.retire(outgoing);
                            info!("Finished reloading");
                        }
                        Err(e) => self.log_reload_failure(&e),
                    }
                }
                Some(Command::Terminate) | None => {
                    info!("Terminating app");
                    for host in current.config.route_set() {
                        self.collab.router.remove_entry(&host).await;
                    }
                    self.retire(current);
                    return;
                }
            }
        }
    }

    /// Materialize a complete incarnation from the bundle: unpack, load the
    /// configuration, and, if the bundle has an executable app, lease a port,
    /// launch the child and hold it at the health gate. Every failure path
    /// releases whatever this call acquired and nothing else.
    async fn stage(&self) -> Result<Deployment> {
        let dir = self.collab.scratch.create(&self.app_id)?;
        info!(bundle = %self.bundle.display(), dir = %dir.display(), "Unpacking bundle");
        bundle::extract(&self.bundle, &dir, self.owner).await?;

        let config = match config::load(&dir) {
            Ok(config) => config,
            Err(e) => {
                self.discard_dir(&dir).await;
                return Err(e);
            }
        };

        let (child, port) = match &config.app {
            Some(app) => match self.launch(app, &dir).await {
                Ok((child, port)) => (Some(child), Some(port)),
                Err(e) => {
                    self.discard_dir(&dir).await;
                    return Err(e);
                }
            },
            None => (None, None),
        };

        Ok(Deployment {
            dir,
            config,
            child,
            port,
        })
    }

    async fn launch(&self, app: &AppSettings, dir: &Path) -> Result<(ChildHandle, u16)> {
        let port = self.collab.router.reserve_port().await?;
        let env = self.child_env(app, port).await;
        let spec = SpawnSpec {
            owner_uid: self.owner.map(|o| o.uid),
            exec: dir.join("config").join(&app.exec),
            work_dir: dir.to_path_buf(),
            args: app.args.clone(),
            env,
        };

        let child = match self.collab.tracker.run(&spec).await {
            Ok(child) => child,
            Err(e) => {
                self.collab.router.release_port(port).await;
                return Err(e);
            }
        };

        if !probe::wait_until_listening(port, &self.timing.probe).await {
            warn!(port, "Process did not start");
            self.collab.tracker.terminate(&child).await;
            self.collab.router.release_port(port).await;
            return Err(Error::ProbeTimeout {
                port,
                deadline: self.timing.probe.deadline,
            });
        }

        Ok((child, port))
    }

    async fn child_env(&self, app: &AppSettings, port: u16) -> HashMap<String, String> {
        let scheme = if app.ssl { "https" } else { "http" };
        let mut env = HashMap::from([
            ("PORT".to_string(), port.to_string()),
            ("APPROOT".to_string(), format!("{scheme}://{}", app.host)),
        ]);

        if app.postgres {
            match self.collab.db.get_info(&self.app_id).await {
                Ok(info) => {
                    env.insert("PGHOST".to_string(), "localhost".to_string());
                    env.insert("PGPORT".to_string(), "5432".to_string());
                    env.insert("PGUSER".to_string(), info.user);
                    env.insert("PGPASS".to_string(), info.pass);
                    env.insert("PGDATABASE".to_string(), info.name);
                }
                Err(e) => {
                    warn!(error = %e, "Database provisioning failed, launching without PG environment");
                }
            }
        }

        env
    }

    /// Upsert every route the incarnation claims. The port entries land only
    /// after the health gate has passed, so the router never resolves an app
    /// host to a child that is not listening.
    async fn publish_routes(&self, deployment: &Deployment) {
        if let (Some(app), Some(port)) = (&deployment.config.app, deployment.port) {
            self.collab
                .router
                .add_entry(&app.host, RouteTarget::Port(port))
                .await;
            for host in &app.extra_hosts {
                self.collab
                    .router
                    .add_entry(host, RouteTarget::Port(port))
                    .await;
            }
        }
        for static_host in &deployment.config.static_hosts {
            self.collab
                .router
                .add_entry(&static_host.host, RouteTarget::Static(static_host.root.clone()))
                .await;
        }
        for redirect in &deployment.config.redirects {
            self.collab
                .router
                .add_entry(&redirect.from, RouteTarget::Redirect(redirect.to.clone()))
                .await;
        }
    }

    fn retire(&self, outgoing: Deployment) {
        retire::schedule(
            self.collab.router.clone(),
            self.collab.tracker.clone(),
            Retiree {
                dir: outgoing.dir,
                child: outgoing.child,
                port: outgoing.port,
            },
            self.timing.drain_window,
            self.timing.remove_window,
        );
    }

    fn log_reload_failure(&self, error: &Error) {
        match error {
            Error::ConfigMissing | Error::ConfigMalformed(_) => {
                warn!(error = %error, "Invalid config file");
            }
            // The health gate already logged the failure in context.
            Error::ProbeTimeout { .. } => {}
            Error::PortExhausted(_) => {
                warn!(error = %error, "Could not lease a port for the new incarnation");
            }
            Error::ChildSpawnFailed(_) => {
                warn!(error = %error, "Failed to launch the new process");
            }
            _ => warn!(error = %error, "Invalid bundle"),
        }
    }

    async fn discard_dir(&self, dir: &Path) {
        if let Err(e) = tokio::fs::remove_dir_all(dir).await {
            warn!(dir = %dir.display(), error = %e, "Failed to remove working directory");
        }
    }

    fn exit(&mut self) {
        if let Some(on_exit) = self.on_exit.take() {
            on_exit();
        }
    }
}
