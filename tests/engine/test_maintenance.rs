// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Background maintenance loop

use chrono::Duration;

use crate::common::network;

#[tokio::test]
async fn test_spawned_loop_sweeps_expired_sessions() {
    let net = network().await;
    net.device("D1").await;
    net.router("R1").await;
    let (_, router_side) = net.handshake("D1", "R1").await.unwrap();
    let id = net
        .engine
        .sessions()
        .establish_from(&router_side)
        .await
        .unwrap()
        .session_id;

    net.clock.advance(Duration::hours(2));
    let handle = net.engine.spawn_maintenance();

    // the first tick fires immediately
    for _ in 0..50 {
        if net.engine.sessions().get(&id).await.is_none() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    handle.abort();
    assert!(net.engine.sessions().get(&id).await.is_none());
}

#[tokio::test]
async fn test_nonce_retention_is_purged() {
    let net = network().await;
    net.device("D1").await;
    net.router("R1").await;
    net.handshake("D1", "R1").await.unwrap();

    let report = net.engine.run_maintenance(net.now()).await;
    assert_eq!(report.nonces_purged, 0);

    // skew (30s) + transport delay (10s)
    net.clock.advance(Duration::seconds(41));
    let report = net.engine.run_maintenance(net.now()).await;
    assert_eq!(report.nonces_purged, 2);
}
