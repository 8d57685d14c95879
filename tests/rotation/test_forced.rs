// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Forced rotation and signer outages

use crate::common::network;
use subkey_network::{EngineError, KeyState, TransitionKind};

#[tokio::test]
async fn test_forced_rotation_drops_old_key_immediately() {
    let net = network().await;
    net.device("D1").await;
    let (r1, _) = net.router("R1").await;
    let device = net.engine.authenticator("D1").await.unwrap();
    let router = net.engine.authenticator("R1").await.unwrap();

    let (mut initiator, hello) = device.initiate().await.unwrap();
    let (_, challenge) = router.handle_hello(&hello).await.unwrap();

    let transition = net.engine.rotation().force_rotation(&r1.id).await.unwrap();
    assert_eq!(transition.kind, TransitionKind::Forced);
    assert!(transition.is_completed());

    let old = net.engine.hierarchy().lookup(&r1.id).await.unwrap();
    assert_eq!(old.state, KeyState::Expired);

    // a challenge signed by the retired key no longer verifies
    let err = device
        .handle_challenge(&mut initiator, &challenge)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ChainOfTrust { .. }));

    assert!(net.handshake("D1", "R1").await.is_ok());
}

#[tokio::test]
async fn test_signer_outage_aborts_only_that_rotation() {
    let net = network().await;
    let (r1, r1_token) = net.router("R1").await;
    let (r2, _) = net.router("R2").await;

    r1_token.set_available(false);
    let err = net.engine.rotation().begin_rotation(&r1.id).await.unwrap_err();
    assert!(matches!(err, EngineError::SignerUnavailable { .. }));

    let hierarchy = net.engine.hierarchy();
    assert_eq!(hierarchy.lookup(&r1.id).await.unwrap().state, KeyState::Active);
    assert!(hierarchy.verify_chain(&r1).await);
    assert!(hierarchy.transitions().await.is_empty());

    assert!(net.engine.rotation().begin_rotation(&r2.id).await.is_ok());

    // the outage is transient; a retry succeeds
    r1_token.set_available(true);
    assert!(net.engine.rotation().begin_rotation(&r1.id).await.is_ok());
}

#[tokio::test]
async fn test_aborted_rotation_keeps_old_key_signing() {
    let net = network().await;
    let (d1, _) = net.device("D1").await;
    net.router("R1").await;

    // the replacement is generated, then certification fails
    net.master.set_available(false);
    let err = net.engine.rotation().begin_rotation(&d1.id).await.unwrap_err();
    assert!(matches!(err, EngineError::SignerUnavailable { .. }));
    net.master.set_available(true);

    let hierarchy = net.engine.hierarchy();
    assert_eq!(hierarchy.current_key("D1").await.unwrap().id, d1.id);
    let (device_side, router_side) = net.handshake("D1", "R1").await.unwrap();
    assert_eq!(device_side.local_key_id, d1.id);
    assert_eq!(router_side.peer_key_id(), &d1.id);

    let transition = net.engine.rotation().begin_rotation(&d1.id).await.unwrap();
    let (device_side, _) = net.handshake("D1", "R1").await.unwrap();
    assert_eq!(device_side.local_key_id, transition.new_key_id);
}
