// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Token validation

use crate::common::network;
use chrono::Duration;
use subkey_network::{AdminOperation, AuthorizationToken, EngineError, KeyId};

fn terminate_op(key_id: &KeyId) -> AdminOperation {
    AdminOperation::TerminateSessionsForKey {
        key_id: key_id.clone(),
    }
}

#[tokio::test]
async fn test_token_is_single_use() {
    let net = network().await;
    let (d1, _) = net.device("D1").await;
    let token = AuthorizationToken::issue(
        net.master.as_ref(),
        &net.master_record,
        terminate_op(&d1.id),
        net.now(),
    )
    .await
    .unwrap();

    assert!(net.engine.admin().execute(&token).await.is_ok());
    let err = net.engine.admin().execute(&token).await.unwrap_err();
    assert!(matches!(err, EngineError::NonceReplay { .. }));
}

#[tokio::test]
async fn test_token_signed_by_subkey_is_rejected() {
    let net = network().await;
    let (d1, d1_token) = net.device("D1").await;

    // claims to be the master but signed by the device token
    let mut forged = AuthorizationToken::issue(
        d1_token.as_ref(),
        &d1,
        terminate_op(&d1.id),
        net.now(),
    )
    .await
    .unwrap();
    let err = net.engine.admin().execute(&forged).await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized { .. }));

    forged.signer_key_id = net.master_record.id.clone();
    let err = net.engine.admin().execute(&forged).await.unwrap_err();
    assert!(matches!(err, EngineError::Signature { .. }));
}

#[tokio::test]
async fn test_altered_operation_breaks_signature() {
    let net = network().await;
    let (d1, _) = net.device("D1").await;
    let (r1, _) = net.router("R1").await;
    let mut token = AuthorizationToken::issue(
        net.master.as_ref(),
        &net.master_record,
        terminate_op(&d1.id),
        net.now(),
    )
    .await
    .unwrap();
    token.operation = AdminOperation::Revoke {
        key_id: r1.id.clone(),
        reason: "hijacked".to_string(),
    };

    let err = net.engine.admin().execute(&token).await.unwrap_err();
    assert!(matches!(err, EngineError::Signature { .. }));
    assert!(!net.engine.revocations().is_revoked(&r1.id).await);
}

#[tokio::test]
async fn test_stale_token_is_rejected() {
    let net = network().await;
    let (d1, _) = net.device("D1").await;
    let token = AuthorizationToken::issue(
        net.master.as_ref(),
        &net.master_record,
        terminate_op(&d1.id),
        net.now() - Duration::minutes(5),
    )
    .await
    .unwrap();

    let err = net.engine.admin().execute(&token).await.unwrap_err();
    assert!(matches!(err, EngineError::ClockSkew { .. }));
}

#[tokio::test]
async fn test_revoked_master_cannot_authorize() {
    let net = network().await;
    let (d1, _) = net.device("D1").await;
    net.engine
        .revocations()
        .revoke(&net.master_record.id, "root compromise")
        .await
        .unwrap();

    let token = AuthorizationToken::issue(
        net.master.as_ref(),
        &net.master_record,
        terminate_op(&d1.id),
        net.now(),
    )
    .await
    .unwrap();
    let err = net.engine.admin().execute(&token).await.unwrap_err();
    assert!(matches!(err, EngineError::ChainOfTrust { .. }));
}
