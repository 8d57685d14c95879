// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Long-term key compromise and revocation versus established sessions

use crate::common::network;
use chrono::Duration;
use subkey_network::{EngineError, KeySlot, SecureSigner, SessionState};

#[tokio::test]
async fn test_revocation_leaves_existing_session_until_expiry() {
    let net = network().await;
    let (d1, _) = net.device("D1").await;
    net.router("R1").await;
    let (device_side, router_side) = net.handshake("D1", "R1").await.unwrap();
    let device = net.session_manager();
    let router = net.session_manager();
    let record = device.establish_from(&device_side).await.unwrap();
    let id = record.session_id.clone();
    router.establish_from(&router_side).await.unwrap();

    net.engine.revocations().revoke(&d1.id, "lost").await.unwrap();

    // new handshakes fail
    assert!(matches!(
        net.handshake("D1", "R1").await,
        Err(EngineError::ChainOfTrust { .. })
    ));

    // the established session keeps working
    let packet = device.encrypt(&id, b"still here").await.unwrap();
    assert_eq!(router.decrypt(&id, &packet).await.unwrap(), b"still here");

    // until its own expiry
    net.clock.set(record.expires_at);
    assert!(matches!(
        device.encrypt(&id, b"too late").await,
        Err(EngineError::SessionExpired { .. })
    ));
}

#[tokio::test]
async fn test_long_term_key_cannot_open_session_traffic() {
    let net = network().await;
    net.device("D1").await;
    let (_, router_token) = net.router("R1").await;
    let (device_side, router_side) = net.handshake("D1", "R1").await.unwrap();
    let device = net.session_manager();
    let router = net.session_manager();
    let id = device.establish_from(&device_side).await.unwrap().session_id;
    router.establish_from(&router_side).await.unwrap();

    let captured = device.encrypt(&id, b"secret").await.unwrap();
    router.terminate(&id).await.unwrap();

    // an attacker holding the router's token gets nothing from past traffic
    assert!(router_token
        .decrypt(KeySlot::SIGNATURE, &captured.ciphertext)
        .await
        .is_err());
    assert!(matches!(
        router.decrypt(&id, &captured).await,
        Err(EngineError::SessionExpired { .. })
    ));

    // a later handshake with the same long-term keys derives unrelated keys
    let (later_device, later_router) = net.handshake("D1", "R1").await.unwrap();
    assert_ne!(later_device.shared_secret(), device_side.shared_secret());
    let fresh = net.session_manager();
    let later_id = fresh.establish_from(&later_router).await.unwrap().session_id;
    assert_ne!(later_id, id);
    let err = fresh.decrypt(&later_id, &captured).await.unwrap_err();
    assert!(matches!(err, EngineError::AuthTag { .. }));
    assert_eq!(
        fresh.get(&later_id).await.unwrap().state,
        SessionState::Terminated
    );
}

#[tokio::test]
async fn test_terminate_sessions_for_revoked_key() {
    let net = network().await;
    let (d1, _) = net.device("D1").await;
    net.router("R1").await;
    let (_, router_side) = net.handshake("D1", "R1").await.unwrap();
    let sessions = net.engine.sessions();
    let id = sessions.establish_from(&router_side).await.unwrap().session_id;

    net.engine.revocations().revoke(&d1.id, "lost").await.unwrap();
    assert_eq!(sessions.terminate_for_key(&d1.id).await, 1);
    assert_eq!(
        sessions.get(&id).await.unwrap().state,
        SessionState::Terminated
    );

    net.clock.advance(Duration::seconds(1));
    net.engine.run_maintenance(net.now()).await;
    assert!(sessions.get(&id).await.is_none());
}
