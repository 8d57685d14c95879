// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Successful handshakes and suite negotiation

use crate::common::{network, network_with};
use subkey_network::crypto::SignatureAlgorithm;
use subkey_network::handshake::Role;
use subkey_network::{
    CipherSuite, EngineConfig, EngineError, HandshakeState, KeySlot, OwnerKind, SoftwareToken,
};
use std::sync::Arc;

#[tokio::test]
async fn test_device_router_handshake_verifies_both_sides() {
    let net = network().await;
    let (d1, _) = net.device("D1").await;
    let (r1, _) = net.router("R1").await;

    let (device_side, router_side) = net.handshake("D1", "R1").await.unwrap();

    assert_eq!(device_side.role, Role::Initiator);
    assert_eq!(router_side.role, Role::Responder);
    assert_eq!(device_side.local_key_id, d1.id);
    assert_eq!(device_side.peer_key_id(), &r1.id);
    assert_eq!(router_side.local_key_id, r1.id);
    assert_eq!(router_side.peer_key_id(), &d1.id);
    assert_eq!(device_side.shared_secret(), router_side.shared_secret());
    assert_eq!(device_side.suite, router_side.suite);
}

#[tokio::test]
async fn test_attempt_states_progress() {
    let net = network().await;
    net.device("D1").await;
    net.router("R1").await;
    let device = net.engine.authenticator("D1").await.unwrap();
    let router = net.engine.authenticator("R1").await.unwrap();

    let (mut initiator, hello) = device.initiate().await.unwrap();
    assert_eq!(initiator.state(), HandshakeState::HelloSent);

    let (mut responder, challenge) = router.handle_hello(&hello).await.unwrap();
    assert_eq!(responder.state(), HandshakeState::ChallengeSent);

    let (response, _) = device
        .handle_challenge(&mut initiator, &challenge)
        .await
        .unwrap();
    assert_eq!(initiator.state(), HandshakeState::Verified);

    router.handle_response(&mut responder, &response).await.unwrap();
    assert_eq!(responder.state(), HandshakeState::Verified);

    // a finished attempt cannot be driven again
    let err = router
        .handle_response(&mut responder, &response)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::HandshakeState { .. }));
}

#[tokio::test]
async fn test_each_handshake_yields_a_fresh_secret() {
    let net = network().await;
    net.device("D1").await;
    net.router("R1").await;

    let (first, _) = net.handshake("D1", "R1").await.unwrap();
    let (second, _) = net.handshake("D1", "R1").await.unwrap();
    assert_ne!(first.shared_secret(), second.shared_secret());
}

#[tokio::test]
async fn test_router_can_initiate() {
    let net = network().await;
    net.device("D1").await;
    net.router("R1").await;

    let (router_side, device_side) = net.handshake("R1", "D1").await.unwrap();
    assert_eq!(router_side.shared_secret(), device_side.shared_secret());
}

#[tokio::test]
async fn test_ed25519_device_key() {
    let net = network().await;
    let token = Arc::new(SoftwareToken::with_key(
        "D-ed",
        KeySlot::AUTHENTICATION,
        SignatureAlgorithm::Ed25519,
    ));
    let record = net
        .engine
        .enroll(OwnerKind::Device, "D-ed", token)
        .await
        .unwrap();
    assert_eq!(record.algorithm, SignatureAlgorithm::Ed25519);
    net.router("R1").await;

    assert!(net.handshake("D-ed", "R1").await.is_ok());
}

#[tokio::test]
async fn test_responder_preference_selects_suite() {
    let mut config = EngineConfig::default();
    config.handshake.cipher_suites = vec![
        CipherSuite::Secp256k1Aes256GcmSha256,
        CipherSuite::Secp256k1XChaCha20Poly1305Sha256,
    ];
    let net = network_with(config).await;
    net.device("D1").await;
    net.router("R1").await;

    let router = net.engine.authenticator("R1").await.unwrap();
    let device = net.engine.authenticator("D1").await.unwrap();
    let (_, hello) = device.initiate().await.unwrap();
    let (responder, challenge) = router.handle_hello(&hello).await.unwrap();
    assert_eq!(challenge.selected_suite, CipherSuite::Secp256k1Aes256GcmSha256);
    assert_eq!(responder.suite(), CipherSuite::Secp256k1Aes256GcmSha256);
}

#[tokio::test]
async fn test_no_common_suite_is_rejected() {
    let net = network().await;
    net.device("D1").await;
    net.router("R1").await;
    let device = net.engine.authenticator("D1").await.unwrap();
    let router = net.engine.authenticator("R1").await.unwrap();

    let (_, mut hello) = device.initiate().await.unwrap();
    hello.supported_algorithms.clear();
    let err = router.handle_hello(&hello).await.unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedAlgorithm { .. }));
}

#[tokio::test]
async fn test_unenrolled_party_cannot_start() {
    let net = network().await;
    net.router("R1").await;
    let err = net.engine.authenticator("D-unknown").await.unwrap_err();
    assert!(matches!(err, EngineError::SignerUnavailable { .. }));
}
