// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Shared fixtures: one engine acting as the network authority, with
//! software tokens standing in for device and router hardware.
#![allow(dead_code)]

use std::sync::Arc;

use subkey_network::crypto::SignatureAlgorithm;
use chrono::{DateTime, Utc};
use subkey_network::{
    Clock, EngineConfig, EngineResult, HandshakeOutcome, KeyRecord, KeySlot, ManualClock,
    MemoryStateStore, OwnerKind, SecureSessionEngine, SessionManager, SoftwareToken,
};

pub struct Network {
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStateStore>,
    pub master: Arc<SoftwareToken>,
    pub master_record: KeyRecord,
    pub engine: Arc<SecureSessionEngine>,
}

pub async fn network() -> Network {
    network_with(EngineConfig::default()).await
}

pub async fn network_with(config: EngineConfig) -> Network {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(MemoryStateStore::new());
    let master = Arc::new(SoftwareToken::with_key(
        "master",
        KeySlot::SIGNATURE,
        SignatureAlgorithm::EcdsaSecp256k1,
    ));
    let engine = SecureSessionEngine::new(config, master.clone(), store.clone(), clock.clone())
        .expect("engine should build");
    let master_record = engine
        .provision_master("root")
        .await
        .expect("master should provision");
    Network {
        clock,
        store,
        master,
        master_record,
        engine: Arc::new(engine),
    }
}

pub fn token_for(owner_kind: OwnerKind, name: &str) -> Arc<SoftwareToken> {
    Arc::new(SoftwareToken::with_key(
        name,
        KeySlot::default_for(owner_kind),
        SignatureAlgorithm::EcdsaSecp256k1,
    ))
}

impl Network {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Separate session table for one side of a connection
    pub fn session_manager(&self) -> SessionManager {
        SessionManager::new(self.engine.config(), self.clock.clone())
    }

    pub async fn enroll(&self, owner_kind: OwnerKind, label: &str) -> (KeyRecord, Arc<SoftwareToken>) {
        let token = token_for(owner_kind, label);
        let record = self
            .engine
            .enroll(owner_kind, label, token.clone())
            .await
            .expect("enrollment should succeed");
        (record, token)
    }

    pub async fn device(&self, label: &str) -> (KeyRecord, Arc<SoftwareToken>) {
        self.enroll(OwnerKind::Device, label).await
    }

    pub async fn router(&self, label: &str) -> (KeyRecord, Arc<SoftwareToken>) {
        self.enroll(OwnerKind::Router, label).await
    }

    /// Run all three messages; returns (initiator outcome, responder outcome)
    pub async fn handshake(
        &self,
        initiator: &str,
        responder: &str,
    ) -> EngineResult<(HandshakeOutcome, HandshakeOutcome)> {
        let a = self.engine.authenticator(initiator).await?;
        let b = self.engine.authenticator(responder).await?;

        let (mut attempt_a, hello) = a.initiate().await?;
        let (mut attempt_b, challenge) = b.handle_hello(&hello).await?;
        let (response, outcome_a) = a.handle_challenge(&mut attempt_a, &challenge).await?;
        let outcome_b = b.handle_response(&mut attempt_b, &response).await?;
        Ok((outcome_a, outcome_b))
    }
}
