// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Dual-active window during scheduled rotation

use crate::common::network;
use chrono::Duration;
use subkey_network::{EngineError, KeyState, TransitionKind};

#[tokio::test]
async fn test_old_key_trusted_until_window_end() {
    let net = network().await;
    let (r1, _) = net.router("R1").await;

    let transition = net.engine.rotation().begin_rotation(&r1.id).await.unwrap();
    assert_eq!(transition.kind, TransitionKind::Scheduled);
    assert_eq!(transition.window_end, transition.window_start + Duration::days(7));

    let hierarchy = net.engine.hierarchy();
    let old = hierarchy.lookup(&r1.id).await.unwrap();
    let new = hierarchy.lookup(&transition.new_key_id).await.unwrap();
    assert_eq!(old.state, KeyState::Rotating);
    assert_eq!(new.state, KeyState::Active);
    assert_eq!(hierarchy.current_key("R1").await.unwrap().id, new.id);

    let one_ms = Duration::milliseconds(1);
    assert!(hierarchy.verify_chain_at(&old, transition.window_end - one_ms).await);
    assert!(!hierarchy.verify_chain_at(&old, transition.window_end).await);
    assert!(!hierarchy.verify_chain_at(&old, transition.window_end + one_ms).await);
    assert!(hierarchy.verify_chain_at(&new, transition.window_end + one_ms).await);
}

#[tokio::test]
async fn test_in_flight_handshake_completes_across_rotation() {
    let net = network().await;
    net.device("D1").await;
    let (r1, _) = net.router("R1").await;
    let device = net.engine.authenticator("D1").await.unwrap();
    let router = net.engine.authenticator("R1").await.unwrap();

    let (mut initiator, hello) = device.initiate().await.unwrap();
    let (mut responder, challenge) = router.handle_hello(&hello).await.unwrap();
    assert_eq!(challenge.key_record.id, r1.id);

    net.engine.rotation().begin_rotation(&r1.id).await.unwrap();

    let (response, device_side) = device
        .handle_challenge(&mut initiator, &challenge)
        .await
        .unwrap();
    let router_side = router.handle_response(&mut responder, &response).await.unwrap();
    assert_eq!(device_side.peer_key_id(), &r1.id);
    assert_eq!(router_side.local_key_id, r1.id);

    // new handshakes use the replacement key
    let (fresh, _) = net.handshake("D1", "R1").await.unwrap();
    assert_ne!(fresh.peer_key_id(), &r1.id);
}

#[tokio::test]
async fn test_initiator_rotating_mid_handshake_signs_with_old_key() {
    let net = network().await;
    let (d1, _) = net.device("D1").await;
    net.router("R1").await;
    let device = net.engine.authenticator("D1").await.unwrap();
    let router = net.engine.authenticator("R1").await.unwrap();

    let (mut initiator, hello) = device.initiate().await.unwrap();
    let (mut responder, challenge) = router.handle_hello(&hello).await.unwrap();

    let transition = net.engine.rotation().begin_rotation(&d1.id).await.unwrap();

    let (response, device_side) = device
        .handle_challenge(&mut initiator, &challenge)
        .await
        .unwrap();
    assert_eq!(response.key_record.id, d1.id);
    let router_side = router.handle_response(&mut responder, &response).await.unwrap();
    assert_eq!(device_side.local_key_id, d1.id);
    assert_eq!(router_side.peer_key_id(), &d1.id);

    // both keys sign during the window, each from its own slot
    let (fresh, _) = net.handshake("D1", "R1").await.unwrap();
    assert_eq!(fresh.local_key_id, transition.new_key_id);

    // and the key after next goes back into the original slot
    net.clock.set(transition.window_end);
    net.engine
        .rotation()
        .complete_rotation(&transition.id)
        .await
        .unwrap();
    let next = net
        .engine
        .rotation()
        .begin_rotation(&transition.new_key_id)
        .await
        .unwrap();
    let (latest, _) = net.handshake("D1", "R1").await.unwrap();
    assert_eq!(latest.local_key_id, next.new_key_id);
}

#[tokio::test]
async fn test_complete_rotation_respects_window() {
    let net = network().await;
    let (r1, _) = net.router("R1").await;
    let rotation = net.engine.rotation();
    let transition = rotation.begin_rotation(&r1.id).await.unwrap();

    let err = rotation.complete_rotation(&transition.id).await.unwrap_err();
    assert!(matches!(err, EngineError::RotationWindowOpen { .. }));

    net.clock.set(transition.window_end);
    let completed = rotation.complete_rotation(&transition.id).await.unwrap();
    assert_eq!(completed.completed_at, Some(transition.window_end));
    assert_eq!(
        net.engine.hierarchy().lookup(&r1.id).await.unwrap().state,
        KeyState::Expired
    );

    // completing twice returns the same transition
    let again = rotation.complete_rotation(&transition.id).await.unwrap();
    assert_eq!(again, completed);

    assert!(matches!(
        rotation.complete_rotation("no-such-transition").await,
        Err(EngineError::TransitionNotFound { .. })
    ));
}

#[tokio::test]
async fn test_concurrent_rotation_of_same_key_conflicts() {
    let net = network().await;
    let (r1, token) = net.router("R1").await;
    token.set_latency(std::time::Duration::from_millis(50));
    let rotation = net.engine.rotation();

    let (first, second) = tokio::join!(
        rotation.begin_rotation(&r1.id),
        rotation.begin_rotation(&r1.id)
    );
    assert!(first.is_ok());
    assert!(matches!(second, Err(EngineError::RotationConflict { .. })));

    // rotating the now-Rotating key is refused
    assert!(matches!(
        rotation.begin_rotation(&r1.id).await,
        Err(EngineError::NotActive {
            state: KeyState::Rotating,
            ..
        })
    ));
}

#[tokio::test]
async fn test_master_never_rotates() {
    let net = network().await;
    let err = net
        .engine
        .rotation()
        .begin_rotation(&net.master_record.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ChainOfTrust { .. }));
}
