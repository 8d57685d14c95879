// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! In-memory secure signer for tests and simulation
//!
//! Behaves like a hardware token from the engine's point of view: keys are
//! generated inside it and only public keys, signatures and decrypted
//! envelopes leave it. Latency and outages can be injected.

use async_trait::async_trait;
use ed25519_dalek::Signer as _;
use k256::ecdsa::signature::Signer as _;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{KeySlot, SecureSigner};
use crate::crypto::{open_envelope, SignatureAlgorithm};
use crate::error::{EngineError, EngineResult};

enum SlotKey {
    Ecdsa(k256::SecretKey),
    Ed25519(ed25519_dalek::SigningKey),
}

impl SlotKey {
    fn generate(algorithm: SignatureAlgorithm) -> Self {
        match algorithm {
            SignatureAlgorithm::EcdsaSecp256k1 => SlotKey::Ecdsa(k256::SecretKey::random(&mut OsRng)),
            SignatureAlgorithm::Ed25519 => {
                SlotKey::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng))
            }
        }
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            SlotKey::Ecdsa(_) => SignatureAlgorithm::EcdsaSecp256k1,
            SlotKey::Ed25519(_) => SignatureAlgorithm::Ed25519,
        }
    }

    fn public_key(&self) -> Vec<u8> {
        match self {
            SlotKey::Ecdsa(secret) => secret
                .public_key()
                .to_encoded_point(true)
                .as_bytes()
                .to_vec(),
            SlotKey::Ed25519(signing_key) => signing_key.verifying_key().to_bytes().to_vec(),
        }
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        match self {
            SlotKey::Ecdsa(secret) => {
                let signing_key = k256::ecdsa::SigningKey::from(secret);
                let signature: k256::ecdsa::Signature = signing_key.sign(data);
                signature.to_bytes().to_vec()
            }
            SlotKey::Ed25519(signing_key) => signing_key.sign(data).to_bytes().to_vec(),
        }
    }
}

/// Software stand-in for a hardware token
pub struct SoftwareToken {
    name: String,
    slots: Mutex<HashMap<KeySlot, SlotKey>>,
    latency: Mutex<Duration>,
    available: AtomicBool,
    operations: AtomicU64,
}

impl SoftwareToken {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slots: Mutex::new(HashMap::new()),
            latency: Mutex::new(Duration::ZERO),
            available: AtomicBool::new(true),
            operations: AtomicU64::new(0),
        }
    }

    /// Token with one key already generated in `slot`
    pub fn with_key(name: impl Into<String>, slot: KeySlot, algorithm: SignatureAlgorithm) -> Self {
        let token = Self::new(name);
        token.provision(slot, algorithm);
        token
    }

    /// Generate a key without going through the async interface
    pub fn provision(&self, slot: KeySlot, algorithm: SignatureAlgorithm) -> Vec<u8> {
        let key = SlotKey::generate(algorithm);
        let public_key = key.public_key();
        self.lock_slots().insert(slot, key);
        public_key
    }

    /// Delay applied before every operation
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// Simulate the token being unplugged or locked
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of operations served
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::SeqCst)
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<KeySlot, SlotKey>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn enter(&self, operation: &str) -> EngineResult<()> {
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(EngineError::SignerUnavailable {
                operation: operation.to_string(),
                reason: format!("token {} is not available", self.name),
            });
        }
        self.operations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn empty_slot(&self, operation: &str, slot: KeySlot) -> EngineError {
        EngineError::SignerUnavailable {
            operation: operation.to_string(),
            reason: format!("token {} has no key in slot {}", self.name, slot),
        }
    }
}

#[async_trait]
impl SecureSigner for SoftwareToken {
    async fn sign(&self, slot: KeySlot, data: &[u8]) -> EngineResult<Vec<u8>> {
        self.enter("sign").await?;
        let slots = self.lock_slots();
        let key = slots.get(&slot).ok_or_else(|| self.empty_slot("sign", slot))?;
        Ok(key.sign(data))
    }

    async fn decrypt(&self, slot: KeySlot, ciphertext: &[u8]) -> EngineResult<Vec<u8>> {
        self.enter("decrypt").await?;
        let secret = {
            let slots = self.lock_slots();
            match slots.get(&slot) {
                Some(SlotKey::Ecdsa(secret)) => secret.clone(),
                Some(SlotKey::Ed25519(_)) => {
                    return Err(EngineError::UnsupportedAlgorithm {
                        offered: "Ed25519 slots cannot decrypt".to_string(),
                    })
                }
                None => return Err(self.empty_slot("decrypt", slot)),
            }
        };
        Ok(open_envelope(&secret, ciphertext)?)
    }

    async fn get_public_key(&self, slot: KeySlot) -> EngineResult<Vec<u8>> {
        self.enter("get_public_key").await?;
        let slots = self.lock_slots();
        let key = slots
            .get(&slot)
            .ok_or_else(|| self.empty_slot("get_public_key", slot))?;
        Ok(key.public_key())
    }

    async fn generate_key(
        &self,
        slot: KeySlot,
        algorithm: SignatureAlgorithm,
    ) -> EngineResult<Vec<u8>> {
        self.enter("generate_key").await?;
        let public_key = self.provision(slot, algorithm);
        tracing::debug!("Token {} generated {:?} key in slot {}", self.name, algorithm, slot);
        Ok(public_key)
    }

    async fn algorithm(&self, slot: KeySlot) -> EngineResult<SignatureAlgorithm> {
        self.enter("algorithm").await?;
        let slots = self.lock_slots();
        let key = slots
            .get(&slot)
            .ok_or_else(|| self.empty_slot("algorithm", slot))?;
        Ok(key.algorithm())
    }
}
