// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Restoring engine state from a store

use std::sync::Arc;

use chrono::Duration;
use subkey_network::crypto::SignatureAlgorithm;
use subkey_network::{
    Clock, EngineConfig, EngineError, ErrorKind, JsonFileStateStore, KeySlot, KeyState, ManualClock,
    OwnerKind, SecureSessionEngine, SoftwareToken, StateStore,
};
use tempfile::TempDir;

use crate::common::{network, token_for};

#[tokio::test]
async fn test_restore_from_json_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    let clock = Arc::new(ManualClock::starting_now());
    let master = Arc::new(SoftwareToken::with_key(
        "master",
        KeySlot::SIGNATURE,
        SignatureAlgorithm::EcdsaSecp256k1,
    ));

    let (d1, r1, transition) = {
        let engine = SecureSessionEngine::new(
            EngineConfig::default(),
            master.clone(),
            Arc::new(JsonFileStateStore::new(&path)),
            clock.clone(),
        )
        .unwrap();
        engine.provision_master("root").await.unwrap();
        let d1 = engine
            .enroll(OwnerKind::Device, "D1", token_for(OwnerKind::Device, "D1"))
            .await
            .unwrap();
        let r1 = engine
            .enroll(OwnerKind::Router, "R1", token_for(OwnerKind::Router, "R1"))
            .await
            .unwrap();
        engine.revocations().revoke(&d1.id, "lost").await.unwrap();
        let transition = engine.rotation().begin_rotation(&r1.id).await.unwrap();
        (d1, r1, transition)
    };

    let restarted = SecureSessionEngine::new(
        EngineConfig::default(),
        master,
        Arc::new(JsonFileStateStore::new(&path)),
        clock.clone(),
    )
    .unwrap();
    assert_eq!(restarted.restore().await.unwrap(), 4);

    let hierarchy = restarted.hierarchy();
    assert!(restarted.revocations().is_revoked(&d1.id).await);
    assert_eq!(hierarchy.lookup(&d1.id).await.unwrap().state, KeyState::Revoked);
    assert!(!hierarchy.verify_chain(&d1).await);

    assert_eq!(hierarchy.lookup(&r1.id).await.unwrap().state, KeyState::Rotating);
    assert_eq!(
        hierarchy.current_key("R1").await.unwrap().id,
        transition.new_key_id
    );
    assert_eq!(hierarchy.transition(&transition.id).await, Some(transition.clone()));

    // the restored engine finishes the rotation the first engine started
    clock.advance(Duration::days(7));
    let report = restarted.run_maintenance(clock.now()).await;
    assert_eq!(report.rotation.completed, vec![transition.id]);
}

#[tokio::test]
async fn test_revocation_survives_storage_failure() {
    let net = network().await;
    let (d1, _) = net.device("D1").await;

    net.store.set_fail_writes(true);
    let err = net
        .engine
        .revocations()
        .revoke(&d1.id, "lost")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(net.engine.revocations().is_revoked(&d1.id).await);
    let device = net.engine.authenticator("D1").await.unwrap();
    assert!(matches!(
        device.initiate().await,
        Err(EngineError::ChainOfTrust { .. })
    ));
    assert!(!net.engine.hierarchy().verify_chain(&d1).await);

    net.store.set_fail_writes(false);
    let state = net.store.load().await.unwrap();
    assert!(state.revocations.is_empty());
}
