// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Revocation before and during handshakes

use crate::common::network;
use subkey_network::{EngineError, HandshakeState, KeyState};

#[tokio::test]
async fn test_revoked_device_cannot_authenticate() {
    let net = network().await;
    let (d1, _) = net.device("D1").await;
    net.router("R1").await;
    assert!(net.handshake("D1", "R1").await.is_ok());

    net.engine
        .revocations()
        .revoke(&d1.id, "device reported stolen")
        .await
        .unwrap();

    let err = net.handshake("D1", "R1").await.unwrap_err();
    assert!(matches!(err, EngineError::ChainOfTrust { ref key_id, .. } if *key_id == d1.id));

    let err = net.handshake("R1", "D1").await.unwrap_err();
    assert!(matches!(err, EngineError::ChainOfTrust { .. }));
}

#[tokio::test]
async fn test_revocation_between_messages_fails_responder() {
    let net = network().await;
    let (d1, _) = net.device("D1").await;
    net.router("R1").await;
    let device = net.engine.authenticator("D1").await.unwrap();
    let router = net.engine.authenticator("R1").await.unwrap();

    let (mut initiator, hello) = device.initiate().await.unwrap();
    let (mut responder, challenge) = router.handle_hello(&hello).await.unwrap();
    let (response, _) = device
        .handle_challenge(&mut initiator, &challenge)
        .await
        .unwrap();

    net.engine.revocations().revoke(&d1.id, "compromised").await.unwrap();

    let err = router
        .handle_response(&mut responder, &response)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ChainOfTrust { .. }));
    assert_eq!(responder.state(), HandshakeState::Failed);
}

#[tokio::test]
async fn test_revoked_own_key_cannot_complete() {
    let net = network().await;
    let (d1, _) = net.device("D1").await;
    net.router("R1").await;
    let device = net.engine.authenticator("D1").await.unwrap();
    let router = net.engine.authenticator("R1").await.unwrap();

    let (mut initiator, hello) = device.initiate().await.unwrap();
    let (_, challenge) = router.handle_hello(&hello).await.unwrap();

    net.engine.revocations().revoke(&d1.id, "compromised").await.unwrap();

    let err = device
        .handle_challenge(&mut initiator, &challenge)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ChainOfTrust { .. }));
    assert_eq!(initiator.state(), HandshakeState::Failed);
}

#[tokio::test]
async fn test_revoked_master_invalidates_every_chain() {
    let net = network().await;
    let (d1, _) = net.device("D1").await;
    net.router("R1").await;

    net.engine
        .revocations()
        .revoke(&net.master_record.id, "root compromise")
        .await
        .unwrap();

    assert!(!net.engine.hierarchy().verify_chain(&d1).await);
    assert!(matches!(
        net.handshake("D1", "R1").await,
        Err(EngineError::ChainOfTrust { .. })
    ));
}

#[tokio::test]
async fn test_revoke_is_idempotent_and_terminal() {
    let net = network().await;
    let (d1, _) = net.device("D1").await;

    let first = net.engine.revocations().revoke(&d1.id, "lost").await.unwrap();
    let second = net
        .engine
        .revocations()
        .revoke(&d1.id, "lost again")
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(net.engine.revocations().len().await, 1);

    let record = net.engine.hierarchy().lookup(&d1.id).await.unwrap();
    assert_eq!(record.state, KeyState::Revoked);
    assert!(matches!(
        net.engine.rotation().begin_rotation(&d1.id).await,
        Err(EngineError::NotActive { .. })
    ));
}
