// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Key Hierarchy Manager
//!
//! Issues and tracks the Master key and the device/router sub-keys it
//! certifies, and answers chain-of-trust queries.
//!
//! ## Chain of trust
//!
//! The hierarchy is fixed at depth two: Master → Sub-key. A presented record
//! is trusted at instant `t` when:
//!
//! 1. it matches the authoritative table entry for its id
//! 2. its certificate verifies under the Master's public key
//! 3. no link on the path is in the revocation registry
//! 4. every link is Active and unexpired at `t`, or Rotating with `t` before
//!    the transition's `window_end`
//!
//! Only the Master signs certificates. The Master never expires or rotates.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{
    KeyId, KeyRecord, KeyState, OwnerKind, RevocationRegistry, RotationTransition,
    SharedKeyTable, TransitionKind,
};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::crypto::{ecdh::parse_public_key, verify_signature, CryptoError, SignatureAlgorithm};
use crate::error::{EngineError, EngineResult};
use crate::signer::{KeySlot, SecureSigner};
use crate::storage::StateStore;

/// Parameters for a new sub-key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubkeyRequest {
    pub owner_kind: OwnerKind,
    pub label: String,
    pub public_key: Vec<u8>,
    pub algorithm: SignatureAlgorithm,
    pub slot: KeySlot,
}

impl SubkeyRequest {
    /// Request with the algorithm inferred from the key length and the
    /// owner's default slot
    pub fn new(owner_kind: OwnerKind, label: impl Into<String>, public_key: Vec<u8>) -> Self {
        let algorithm = if public_key.len() == 32 {
            SignatureAlgorithm::Ed25519
        } else {
            SignatureAlgorithm::EcdsaSecp256k1
        };
        Self {
            owner_kind,
            label: label.into(),
            public_key,
            algorithm,
            slot: KeySlot::default_for(owner_kind),
        }
    }

    pub fn with_slot(mut self, slot: KeySlot) -> Self {
        self.slot = slot;
        self
    }

    pub fn with_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }
}

struct ChainLink {
    record: KeyRecord,
    window_end: Option<DateTime<Utc>>,
}

pub struct KeyHierarchyManager {
    config: EngineConfig,
    table: SharedKeyTable,
    revocations: Arc<RevocationRegistry>,
    master_signer: Arc<dyn SecureSigner>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
}

impl KeyHierarchyManager {
    pub fn new(
        config: EngineConfig,
        table: SharedKeyTable,
        revocations: Arc<RevocationRegistry>,
        master_signer: Arc<dyn SecureSigner>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            table,
            revocations,
            master_signer,
            store,
            clock,
        }
    }

    pub(crate) fn table(&self) -> &SharedKeyTable {
        &self.table
    }

    pub fn revocations(&self) -> &Arc<RevocationRegistry> {
        &self.revocations
    }

    pub(crate) fn master_signer(&self) -> &Arc<dyn SecureSigner> {
        &self.master_signer
    }

    /// Create the unique, self-certified Master record from the master
    /// signer's signature slot
    ///
    /// # Errors
    ///
    /// - `ChainOfTrust` if a Master already exists
    /// - `SignerUnavailable` if the master signer cannot be reached
    pub async fn provision_master(&self, label: &str) -> EngineResult<KeyRecord> {
        if let Some(existing) = self.master().await {
            return Err(EngineError::ChainOfTrust {
                key_id: existing.id,
                reason: "master key already provisioned".to_string(),
            });
        }

        let slot = KeySlot::SIGNATURE;
        let public_key = self.master_signer.get_public_key(slot).await?;
        let algorithm = self.master_signer.algorithm(slot).await?;
        let now = self.clock.now();
        let id = KeyId::from_public_key(&public_key);

        let mut record = KeyRecord {
            id: id.clone(),
            label: label.to_string(),
            owner_kind: OwnerKind::Master,
            public_key,
            algorithm,
            slot,
            created_at: now,
            expires_at: None,
            state: KeyState::Active,
            updated_at: now,
            signed_by: id.clone(),
            certificate: Vec::new(),
        };
        record.certificate = self
            .master_signer
            .sign(slot, &record.signing_payload()?)
            .await?;

        {
            let mut table = self.table.write().await;
            if let Some(existing) = table.master() {
                return Err(EngineError::ChainOfTrust {
                    key_id: existing.id.clone(),
                    reason: "master key already provisioned".to_string(),
                });
            }
            table.insert(record.clone());
        }

        info!("👑 Master key {} provisioned ({})", id, label);
        self.persist_key(&record).await?;
        Ok(record)
    }

    /// Issue a sub-key for `label`, certified by the Master
    pub async fn issue_subkey(
        &self,
        owner_kind: OwnerKind,
        label: &str,
        requester_public_key: Vec<u8>,
    ) -> EngineResult<KeyRecord> {
        self.issue(SubkeyRequest::new(owner_kind, label, requester_public_key))
            .await
    }

    /// Issue a sub-key from an explicit request
    ///
    /// # Errors
    ///
    /// - `ChainOfTrust` if there is no Active Master, the owner kind is
    ///   Master, or the public key is already registered
    /// - `RotationConflict` if the label already has an Active key
    /// - `Crypto` if the public key does not parse for the algorithm
    pub async fn issue(&self, request: SubkeyRequest) -> EngineResult<KeyRecord> {
        let id = KeyId::from_public_key(&request.public_key);
        if request.owner_kind == OwnerKind::Master {
            return Err(EngineError::ChainOfTrust {
                key_id: id,
                reason: "the master key cannot be issued as a sub-key".to_string(),
            });
        }
        validate_public_key(request.algorithm, &request.public_key)?;

        let master = self.signing_master(&id).await?;
        {
            let table = self.table.read().await;
            if let Some(current) = table.current(&request.label) {
                return Err(EngineError::RotationConflict {
                    key_id: current.id.clone(),
                });
            }
        }

        let now = self.clock.now();
        let mut record = KeyRecord {
            id: id.clone(),
            label: request.label,
            owner_kind: request.owner_kind,
            public_key: request.public_key,
            algorithm: request.algorithm,
            slot: request.slot,
            created_at: now,
            expires_at: Some(now + self.lifetime_for(request.owner_kind)),
            state: KeyState::Active,
            updated_at: now,
            signed_by: master.id.clone(),
            certificate: Vec::new(),
        };
        record.certificate = self.certify(&master, &record).await?;

        {
            let mut table = self.table.write().await;
            if table.contains(&id) {
                return Err(EngineError::ChainOfTrust {
                    key_id: id,
                    reason: "public key already registered".to_string(),
                });
            }
            if let Some(current) = table.current(&record.label) {
                return Err(EngineError::RotationConflict {
                    key_id: current.id.clone(),
                });
            }
            table.insert(record.clone());
        }

        info!(
            "🔑 Issued {} sub-key {} for {} (expires {})",
            record.owner_kind,
            record.id,
            record.label,
            record.expires_at.map(|t| t.to_rfc3339()).unwrap_or_default()
        );
        self.persist_key(&record).await?;
        Ok(record)
    }

    /// Build and certify the replacement for `retiring`, held in `slot` and
    /// valid from `at`
    ///
    /// Nothing is inserted; see [`Self::commit_replacement`].
    pub(crate) async fn certify_replacement(
        &self,
        retiring: &KeyRecord,
        public_key: Vec<u8>,
        slot: KeySlot,
        at: DateTime<Utc>,
    ) -> EngineResult<KeyRecord> {
        validate_public_key(retiring.algorithm, &public_key)?;
        let id = KeyId::from_public_key(&public_key);
        let master = self.signing_master(&id).await?;

        let mut record = KeyRecord {
            id,
            label: retiring.label.clone(),
            owner_kind: retiring.owner_kind,
            public_key,
            algorithm: retiring.algorithm,
            slot,
            created_at: at,
            expires_at: Some(at + self.lifetime_for(retiring.owner_kind)),
            state: KeyState::Active,
            updated_at: at,
            signed_by: master.id.clone(),
            certificate: Vec::new(),
        };
        record.certificate = self.certify(&master, &record).await?;
        Ok(record)
    }

    /// Atomically publish a replacement and retire the old key
    ///
    /// The old key becomes Rotating, or Expired for a forced transition.
    /// Returns the updated old record.
    pub(crate) async fn commit_replacement(
        &self,
        replacement: KeyRecord,
        transition: RotationTransition,
    ) -> EngineResult<KeyRecord> {
        let mut table = self.table.write().await;
        let old_state = table
            .get(&transition.old_key_id)
            .map(|r| r.state)
            .ok_or_else(|| EngineError::KeyNotFound {
                key_id: transition.old_key_id.clone(),
            })?;
        if old_state != KeyState::Active {
            return Err(EngineError::NotActive {
                key_id: transition.old_key_id.clone(),
                state: old_state,
            });
        }
        if table.contains(&replacement.id) {
            return Err(EngineError::ChainOfTrust {
                key_id: replacement.id.clone(),
                reason: "replacement public key already registered".to_string(),
            });
        }

        let retired_state = match transition.kind {
            TransitionKind::Scheduled => KeyState::Rotating,
            TransitionKind::Forced => KeyState::Expired,
        };
        let old = table
            .set_state(&transition.old_key_id, retired_state, transition.window_start)
            .ok_or_else(|| EngineError::NotActive {
                key_id: transition.old_key_id.clone(),
                state: old_state,
            })?;
        table.insert(replacement);
        table.insert_transition(transition);
        Ok(old)
    }

    pub async fn lookup(&self, key_id: &KeyId) -> Option<KeyRecord> {
        self.table.read().await.get(key_id).cloned()
    }

    /// The key currently signing for `label`
    ///
    /// Always the Active record; a Rotating predecessor is never returned.
    pub async fn current_key(&self, label: &str) -> Option<KeyRecord> {
        self.table.read().await.current(label).cloned()
    }

    pub async fn master(&self) -> Option<KeyRecord> {
        self.table.read().await.master().cloned()
    }

    pub async fn records(&self) -> Vec<KeyRecord> {
        self.table.read().await.records().cloned().collect()
    }

    pub async fn transition(&self, transition_id: &str) -> Option<RotationTransition> {
        self.table.read().await.transition(transition_id).cloned()
    }

    pub async fn transitions(&self) -> Vec<RotationTransition> {
        self.table.read().await.transitions().cloned().collect()
    }

    pub async fn verify_chain(&self, record: &KeyRecord) -> bool {
        self.check_chain(record).await.is_ok()
    }

    pub async fn verify_chain_at(&self, record: &KeyRecord, at: DateTime<Utc>) -> bool {
        self.check_chain_at(record, at).await.is_ok()
    }

    /// [`Self::check_chain_at`] at the current time
    pub async fn check_chain(&self, record: &KeyRecord) -> EngineResult<()> {
        self.check_chain_at(record, self.clock.now()).await
    }

    /// Walk the chain from `record` to the Master at instant `at`
    ///
    /// Fails closed with `ChainOfTrust` naming the first failing link.
    pub async fn check_chain_at(&self, record: &KeyRecord, at: DateTime<Utc>) -> EngineResult<()> {
        let (links, master) = self.collect_chain(record).await?;

        for link in &links {
            if self.revocations.is_revoked(&link.record.id).await {
                return Err(chain_error(&link.record.id, "key has been revoked"));
            }
            check_link_state(link, at)?;
        }

        let leaf = &links[0].record;
        let payload = leaf.signing_payload()?;
        verify_signature(master.algorithm, &master.public_key, &payload, &leaf.certificate)
            .map_err(|e| {
                warn!("Certificate check failed for {}: {}", leaf.id, e);
                chain_error(&leaf.id, "certificate does not verify under the master key")
            })?;
        Ok(())
    }

    /// Resolve the presented record and its signer under one read lock
    async fn collect_chain(&self, presented: &KeyRecord) -> EngineResult<(Vec<ChainLink>, KeyRecord)> {
        let table = self.table.read().await;
        let authoritative = table
            .get(&presented.id)
            .ok_or_else(|| chain_error(&presented.id, "unknown key"))?;
        if authoritative.signing_payload()? != presented.signing_payload()?
            || authoritative.certificate != presented.certificate
        {
            return Err(chain_error(
                &presented.id,
                "record does not match the registered key",
            ));
        }

        let leaf = ChainLink {
            record: authoritative.clone(),
            window_end: table
                .transition_for_old_key(&authoritative.id)
                .map(|t| t.window_end),
        };
        if authoritative.is_master() {
            return Ok((vec![leaf], authoritative.clone()));
        }

        let parent = table
            .get(&authoritative.signed_by)
            .ok_or_else(|| chain_error(&authoritative.signed_by, "signing key missing"))?;
        if !parent.is_master() {
            return Err(chain_error(
                &authoritative.id,
                "sub-key is not signed by the master",
            ));
        }
        let links = vec![
            leaf,
            ChainLink {
                record: parent.clone(),
                window_end: None,
            },
        ];
        Ok((links, parent.clone()))
    }

    /// Reload persisted records and transitions
    pub async fn restore(&self, records: Vec<KeyRecord>, transitions: Vec<RotationTransition>) {
        let (count, pending) = (records.len(), transitions.len());
        self.table.write().await.reset(records, transitions);
        info!("Restored {} key records and {} transitions", count, pending);
    }

    pub(crate) async fn persist_key(&self, record: &KeyRecord) -> EngineResult<()> {
        self.store.save_key(record).await.map_err(|e| {
            error!("Failed to persist key {}: {}", record.id, e);
            e
        })
    }

    pub(crate) async fn persist_transition(&self, transition: &RotationTransition) -> EngineResult<()> {
        self.store.save_transition(transition).await.map_err(|e| {
            error!("Failed to persist transition {}: {}", transition.id, e);
            e
        })
    }

    fn lifetime_for(&self, owner_kind: OwnerKind) -> chrono::Duration {
        match owner_kind {
            OwnerKind::Router => self.config.router_key_lifetime(),
            OwnerKind::Device | OwnerKind::Master => self.config.device_key_lifetime(),
        }
    }

    /// The Master, provided it may sign right now
    async fn signing_master(&self, subject: &KeyId) -> EngineResult<KeyRecord> {
        let master = self
            .master()
            .await
            .ok_or_else(|| chain_error(subject, "no master key provisioned"))?;
        if master.state != KeyState::Active || self.revocations.is_revoked(&master.id).await {
            return Err(chain_error(subject, "master key is not active"));
        }
        Ok(master)
    }

    async fn certify(&self, master: &KeyRecord, record: &KeyRecord) -> EngineResult<Vec<u8>> {
        let payload = record.signing_payload()?;
        self.master_signer.sign(master.slot, &payload).await
    }
}

fn chain_error(key_id: &KeyId, reason: &str) -> EngineError {
    EngineError::ChainOfTrust {
        key_id: key_id.clone(),
        reason: reason.to_string(),
    }
}

fn check_link_state(link: &ChainLink, at: DateTime<Utc>) -> EngineResult<()> {
    let record = &link.record;
    match record.state {
        KeyState::Active if record.is_expired_at(at) => {
            Err(chain_error(&record.id, "key lifetime has lapsed"))
        }
        KeyState::Active => Ok(()),
        KeyState::Rotating => match link.window_end {
            Some(window_end) if at < window_end => Ok(()),
            _ => Err(chain_error(&record.id, "rotation window has closed")),
        },
        state => Err(EngineError::ChainOfTrust {
            key_id: record.id.clone(),
            reason: format!("key is {:?}", state),
        }),
    }
}

fn validate_public_key(algorithm: SignatureAlgorithm, public_key: &[u8]) -> EngineResult<()> {
    if !algorithm.accepts_public_key_len(public_key.len()) {
        return Err(CryptoError::InvalidKey {
            key_type: format!("{:?}", algorithm),
            reason: format!("unexpected public key length {}", public_key.len()),
        }
        .into());
    }
    if algorithm == SignatureAlgorithm::EcdsaSecp256k1 {
        parse_public_key(public_key, "subkey_public_key")?;
    }
    Ok(())
}
