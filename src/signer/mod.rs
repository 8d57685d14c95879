// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Secure Signer Interface
//!
//! The engine never holds private key material. Every private-key operation
//! goes through a [`SecureSigner`] addressed by a [`KeySlot`] handle; the
//! hardware token behind it is an external collaborator.
//!
//! Calls have variable latency and may fail at any time (token removed, PIN
//! locked). Callers must not hold shared locks across these awaits.

pub mod software;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::crypto::SignatureAlgorithm;
use crate::error::{EngineError, EngineResult};
use crate::keys::{KeyRecord, OwnerKind};

pub use software::SoftwareToken;

/// Hardware slot handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeySlot(pub u8);

impl KeySlot {
    /// PIV authentication slot, used by device sub-keys
    pub const AUTHENTICATION: KeySlot = KeySlot(0x9a);
    /// PIV digital signature slot, used by router sub-keys and the Master
    pub const SIGNATURE: KeySlot = KeySlot(0x9c);
    /// PIV retired key management slot paired with [`KeySlot::AUTHENTICATION`]
    pub const RETIRED_AUTHENTICATION: KeySlot = KeySlot(0x82);
    /// PIV retired key management slot paired with [`KeySlot::SIGNATURE`]
    pub const RETIRED_SIGNATURE: KeySlot = KeySlot(0x83);

    pub fn default_for(owner_kind: OwnerKind) -> Self {
        match owner_kind {
            OwnerKind::Device => KeySlot::AUTHENTICATION,
            OwnerKind::Router | OwnerKind::Master => KeySlot::SIGNATURE,
        }
    }

    /// Slot that receives the replacement when the key in `self` rotates
    ///
    /// Keys alternate between a primary slot and its companion, so the
    /// retiring key keeps signing until its transition closes.
    pub fn staging(self) -> KeySlot {
        match self {
            KeySlot::AUTHENTICATION => KeySlot::RETIRED_AUTHENTICATION,
            KeySlot::RETIRED_AUTHENTICATION => KeySlot::AUTHENTICATION,
            KeySlot::SIGNATURE => KeySlot::RETIRED_SIGNATURE,
            KeySlot::RETIRED_SIGNATURE => KeySlot::SIGNATURE,
            KeySlot(other) => KeySlot(other ^ 0x01),
        }
    }
}

impl fmt::Display for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

/// Protected-hardware signing and decryption capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecureSigner: Send + Sync {
    /// Sign `data` with the key in `slot`
    async fn sign(&self, slot: KeySlot, data: &[u8]) -> EngineResult<Vec<u8>>;

    /// Open a sealed envelope addressed to the key in `slot`
    async fn decrypt(&self, slot: KeySlot, ciphertext: &[u8]) -> EngineResult<Vec<u8>>;

    async fn get_public_key(&self, slot: KeySlot) -> EngineResult<Vec<u8>>;

    /// Generate a fresh key pair in `slot`, replacing any previous one
    async fn generate_key(
        &self,
        slot: KeySlot,
        algorithm: SignatureAlgorithm,
    ) -> EngineResult<Vec<u8>>;

    async fn algorithm(&self, slot: KeySlot) -> EngineResult<SignatureAlgorithm>;
}

/// Source of replacement public keys for rotation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Produce a fresh key in `slot` to replace `retiring`
    ///
    /// `slot` is never the retiring key's own slot.
    async fn fresh_public_key(
        &self,
        retiring: &KeyRecord,
        slot: KeySlot,
    ) -> EngineResult<Vec<u8>>;
}

/// [`KeySource`] that generates replacements on each owner's signer
///
/// Signers are registered per label; the replacement uses the retiring
/// key's algorithm.
#[derive(Default)]
pub struct SignerKeySource {
    signers: RwLock<HashMap<String, Arc<dyn SecureSigner>>>,
}

impl SignerKeySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, label: impl Into<String>, signer: Arc<dyn SecureSigner>) {
        let label = label.into();
        tracing::debug!("Registered signer for {}", label);
        self.signers.write().await.insert(label, signer);
    }

    pub async fn signer_for(&self, label: &str) -> Option<Arc<dyn SecureSigner>> {
        self.signers.read().await.get(label).cloned()
    }
}

#[async_trait]
impl KeySource for SignerKeySource {
    async fn fresh_public_key(
        &self,
        retiring: &KeyRecord,
        slot: KeySlot,
    ) -> EngineResult<Vec<u8>> {
        let signer = self.signer_for(&retiring.label).await.ok_or_else(|| {
            EngineError::SignerUnavailable {
                operation: "generate_key".to_string(),
                reason: format!("no signer registered for {}", retiring.label),
            }
        })?;

        signer.generate_key(slot, retiring.algorithm).await
    }
}
