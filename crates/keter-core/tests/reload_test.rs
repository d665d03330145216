// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Zero-downtime reload behavior: cut-over, rollback, delayed retirement.

mod common;

use common::{TestHost, WAIT, wait_for};
use keter_core::{MockBehavior, RouteTarget};

fn port_of(target: Option<RouteTarget>) -> u16 {
    match target {
        Some(RouteTarget::Port(port)) => port,
        other => panic!("expected a port target, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reload_with_host_change() {
    let host = TestHost::new();
    let bundle = host.bundle("app.tar.gz", "host: a.example\nexec: app\n");

    let handle = host.spawn(&bundle);
    assert!(
        wait_for(|| host.router.target_for("a.example").is_some(), WAIT).await
    );
    let old_port = port_of(host.router.target_for("a.example"));
    let old_dir = host.tracker.spawned()[0].work_dir.clone();

    // Operator drops a new bundle at the same path, now under a new host.
    host.bundle("app.tar.gz", "host: b.example\nexec: app\n");
    handle.reload();

    assert!(
        wait_for(|| host.router.target_for("b.example").is_some(), WAIT).await
    );
    let new_port = port_of(host.router.target_for("b.example"));
    assert_ne!(old_port, new_port);

    // The old primary host is retracted by the cut-over, but the old child
    // keeps draining until its window elapses.
    assert!(
        wait_for(|| host.router.target_for("a.example").is_none(), WAIT).await
    );
    assert_eq!(host.tracker.running_count(), 2);
    assert!(host.router.leased_ports().contains(&old_port));

    // Drain window: old child killed, old port released.
    assert!(wait_for(|| host.tracker.running_count() == 1, WAIT).await);
    assert!(
        wait_for(
            || host.router.leased_ports() == [new_port].into_iter().collect(),
            WAIT
        )
        .await
    );

    // Removal window: old working tree deleted.
    assert!(wait_for(|| !old_dir.exists(), WAIT).await);

    // The app never died.
    assert_eq!(host.exit_count(), 0);
}

#[tokio::test]
async fn test_failed_reload_is_a_noop() {
    let host = TestHost::new();
    let bundle = host.bundle("app.tar.gz", "host: a.example\nexec: app\n");

    let handle = host.spawn(&bundle);
    assert!(
        wait_for(|| host.router.target_for("a.example").is_some(), WAIT).await
    );
    let old_port = port_of(host.router.target_for("a.example"));

    host.raw_bundle(
        "app.tar.gz",
        &[("config/keter.yaml", 0o644, b"host: [unterminated" as &[u8])],
    );
    handle.reload();

    // The reload fails after the unpack + parse step; give it time to settle.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    assert_eq!(
        host.router.target_for("a.example"),
        Some(RouteTarget::Port(old_port))
    );
    assert_eq!(host.router.entries().len(), 1);
    assert_eq!(host.router.leased_ports(), [old_port].into_iter().collect());
    assert_eq!(host.tracker.running_count(), 1);
    assert_eq!(host.exit_count(), 0);
}

#[tokio::test]
async fn test_reload_probe_failure_rolls_back_new_incarnation() {
    let host = TestHost::new();
    let bundle = host.bundle("app.tar.gz", "host: a.example\nexec: app\n");

    let handle = host.spawn(&bundle);
    assert!(
        wait_for(|| host.router.target_for("a.example").is_some(), WAIT).await
    );
    let old_port = port_of(host.router.target_for("a.example"));

    // The next child never binds its port.
    host.tracker.push_behavior(MockBehavior::ExitImmediately);
    handle.reload();

    // Both launches happened; the failed one was cleaned up.
    assert!(wait_for(|| host.tracker.spawned().len() == 2, WAIT).await);
    assert!(wait_for(|| host.tracker.running_count() == 1, WAIT).await);
    assert!(
        wait_for(
            || host.router.leased_ports() == [old_port].into_iter().collect(),
            WAIT
        )
        .await
    );
    assert_eq!(
        host.router.target_for("a.example"),
        Some(RouteTarget::Port(old_port))
    );
    assert_eq!(host.exit_count(), 0);
}

#[tokio::test]
async fn test_reload_spawn_failure_keeps_old_incarnation() {
    let host = TestHost::new();
    let bundle = host.bundle("app.tar.gz", "host: a.example\nexec: app\n");

    let handle = host.spawn(&bundle);
    assert!(
        wait_for(|| host.router.target_for("a.example").is_some(), WAIT).await
    );
    let old_port = port_of(host.router.target_for("a.example"));

    host.tracker.push_behavior(MockBehavior::FailSpawn);
    handle.reload();

    assert!(wait_for(|| host.tracker.spawned().len() == 2, WAIT).await);
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    assert_eq!(
        host.router.target_for("a.example"),
        Some(RouteTarget::Port(old_port))
    );
    assert_eq!(host.router.leased_ports(), [old_port].into_iter().collect());
    assert_eq!(host.tracker.running_count(), 1);
}

#[tokio::test]
async fn test_reload_identical_bundle_keeps_route_set() {
    let host = TestHost::new();
    let bundle = host.bundle("app.tar.gz", "host: a.example\nexec: app\n");

    let handle = host.spawn(&bundle);
    assert!(
        wait_for(|| host.router.target_for("a.example").is_some(), WAIT).await
    );
    let old_port = port_of(host.router.target_for("a.example"));

    handle.reload();

    // The route moves to the fresh incarnation's port.
    assert!(
        wait_for(
            || port_of(host.router.target_for("a.example")) != old_port,
            WAIT
        )
        .await
    );

    // Once retirement completes, exactly one child, one port, one route.
    assert!(wait_for(|| host.tracker.running_count() == 1, WAIT).await);
    assert!(wait_for(|| host.router.leased_ports().len() == 1, WAIT).await);
    assert_eq!(host.router.entries().len(), 1);
    assert!(!host.router.leased_ports().contains(&old_port));
    assert_eq!(host.exit_count(), 0);
}

#[tokio::test]
async fn test_reload_retracts_dropped_static_hosts_and_redirects() {
    let host = TestHost::new();
    let bundle = host.bundle(
        "app.tar.gz",
        "host: a.example\n\
         exec: app\n\
         static-hosts:\n\
         \x20 - host: s.example\n\
         \x20   root: site\n\
         redirects:\n\
         \x20 - from: r.example\n\
         \x20   to: https://a.example\n",
    );

    let handle = host.spawn(&bundle);
    assert!(wait_for(|| host.router.entries().len() == 3, WAIT).await);

    // The new config keeps the app but drops the static host and redirect.
    host.bundle("app.tar.gz", "host: a.example\nexec: app\n");
    handle.reload();

    assert!(wait_for(|| host.router.entries().len() == 1, WAIT).await);
    assert!(host.router.target_for("s.example").is_none());
    assert!(host.router.target_for("r.example").is_none());
    assert!(matches!(
        host.router.target_for("a.example"),
        Some(RouteTarget::Port(_))
    ));
}

#[tokio::test]
async fn test_commands_queued_behind_reload_apply_in_order() {
    let host = TestHost::new();
    let bundle = host.bundle("app.tar.gz", "host: a.example\nexec: app\n");

    let handle = host.spawn(&bundle);
    assert!(
        wait_for(|| host.router.target_for("a.example").is_some(), WAIT).await
    );

    // A terminate posted right behind a reload takes effect only after the
    // reload settles.
    handle.reload();
    handle.terminate();

    assert!(wait_for(|| host.exit_count() == 1, WAIT).await);
    assert!(host.router.entries().is_empty());
    assert!(wait_for(|| host.tracker.running_count() == 0, WAIT).await);
    assert!(wait_for(|| host.router.leased_ports().is_empty(), WAIT).await);
}
