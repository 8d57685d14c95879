// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Maintenance-driven rotation lifecycle

use crate::common::network;
use chrono::Duration;
use subkey_network::KeyState;

#[tokio::test]
async fn test_full_rotation_cycle_through_maintenance() {
    let net = network().await;
    let (r1, _) = net.router("R1").await;
    let expires_at = r1.expires_at.unwrap();
    assert_eq!(expires_at, r1.created_at + Duration::days(182));

    // outside the lead time nothing happens
    net.clock.set(expires_at - Duration::days(31));
    assert!(net.engine.run_maintenance(net.now()).await.is_idle());

    // 30 days before expiry the rotation starts
    net.clock.set(expires_at - Duration::days(30));
    let report = net.engine.run_maintenance(net.now()).await;
    assert_eq!(report.rotation.started.len(), 1);
    let transition = report.rotation.started[0].clone();
    assert_eq!(transition.old_key_id, r1.id);

    // the window closes after the grace period
    net.clock.set(transition.window_end);
    let report = net.engine.run_maintenance(net.now()).await;
    assert_eq!(report.rotation.completed, vec![transition.id.clone()]);

    let hierarchy = net.engine.hierarchy();
    assert_eq!(hierarchy.lookup(&r1.id).await.unwrap().state, KeyState::Expired);

    // expired keys are archived later
    net.clock.set(transition.window_end + Duration::days(30));
    let report = net.engine.run_maintenance(net.now()).await;
    assert_eq!(report.rotation.archived, vec![r1.id.clone()]);
    assert_eq!(hierarchy.lookup(&r1.id).await.unwrap().state, KeyState::Archived);
    assert!(!hierarchy.verify_chain(&r1).await);

    let replacement = hierarchy.current_key("R1").await.unwrap();
    assert_eq!(replacement.id, transition.new_key_id);
    assert!(hierarchy.verify_chain(&replacement).await);
}

#[tokio::test]
async fn test_device_keys_use_longer_lifetime() {
    let net = network().await;
    let (d1, _) = net.device("D1").await;
    assert_eq!(d1.expires_at, Some(d1.created_at + Duration::days(365)));
    assert_eq!(net.master_record.expires_at, None);
}
