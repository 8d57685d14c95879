// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Handshake deadlines

use crate::common::{network, network_with};
use chrono::Duration;
use subkey_network::{EngineConfig, EngineError, HandshakeState};

#[tokio::test]
async fn test_slow_signer_times_out() {
    let mut config = EngineConfig::default();
    config.handshake.handshake_timeout_seconds = 1;
    let net = network_with(config).await;
    net.device("D1").await;
    let (_, router_token) = net.router("R1").await;
    let device = net.engine.authenticator("D1").await.unwrap();
    let router = net.engine.authenticator("R1").await.unwrap();

    router_token.set_latency(std::time::Duration::from_millis(1500));
    let (_, hello) = device.initiate().await.unwrap();
    let err = router.handle_hello(&hello).await.unwrap_err();
    assert!(matches!(err, EngineError::HandshakeTimeout { .. }));

    // the timed-out attempt gave back its nonce, so the same Hello is fresh
    router_token.set_latency(std::time::Duration::ZERO);
    assert!(router.handle_hello(&hello).await.is_ok());
    assert!(matches!(
        router.handle_hello(&hello).await,
        Err(EngineError::NonceReplay { .. })
    ));
}

#[tokio::test]
async fn test_initiator_timeout_releases_challenge_nonce() {
    let mut config = EngineConfig::default();
    config.handshake.handshake_timeout_seconds = 1;
    let net = network_with(config).await;
    let (_, device_token) = net.device("D1").await;
    net.router("R1").await;
    let device = net.engine.authenticator("D1").await.unwrap();
    let router = net.engine.authenticator("R1").await.unwrap();

    let (mut first, hello) = device.initiate().await.unwrap();
    let (_, challenge) = router.handle_hello(&hello).await.unwrap();

    // the challenge nonce is recorded, then signing overruns the deadline
    device_token.set_latency(std::time::Duration::from_millis(1500));
    let err = device
        .handle_challenge(&mut first, &challenge)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::HandshakeTimeout { .. }));
    assert_eq!(first.state(), HandshakeState::Failed);

    // a fresh attempt is not blocked by the released nonce; it fails on the
    // transcript instead
    device_token.set_latency(std::time::Duration::ZERO);
    let (mut second, _) = device.initiate().await.unwrap();
    let err = device
        .handle_challenge(&mut second, &challenge)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Signature { .. }));
}

#[tokio::test]
async fn test_expired_attempt_fails() {
    let net = network().await;
    net.device("D1").await;
    net.router("R1").await;
    let device = net.engine.authenticator("D1").await.unwrap();
    let router = net.engine.authenticator("R1").await.unwrap();

    let (mut initiator, hello) = device.initiate().await.unwrap();
    let (_, challenge) = router.handle_hello(&hello).await.unwrap();

    net.clock.advance(Duration::seconds(31));
    let err = device
        .handle_challenge(&mut initiator, &challenge)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::HandshakeTimeout { elapsed_ms, .. } if elapsed_ms >= 30_000));
    assert_eq!(initiator.state(), HandshakeState::Failed);
}

#[tokio::test]
async fn test_unavailable_signer_fails_attempt() {
    let net = network().await;
    net.device("D1").await;
    let (_, router_token) = net.router("R1").await;
    let device = net.engine.authenticator("D1").await.unwrap();
    let router = net.engine.authenticator("R1").await.unwrap();

    router_token.set_available(false);
    let (_, hello) = device.initiate().await.unwrap();
    let err = router.handle_hello(&hello).await.unwrap_err();
    assert!(matches!(err, EngineError::SignerUnavailable { .. }));
}
