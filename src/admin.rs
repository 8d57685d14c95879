// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Administrative operations
//!
//! Every operation travels inside an [`AuthorizationToken`] signed by the
//! Master key. Tokens are checked the way handshake signatures are: the
//! signer must be the registered Master with a valid chain, the signature
//! must verify, the timestamp must be within the skew tolerance, and the
//! nonce must not have been seen.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::crypto::verify_signature;
use crate::error::{EngineError, EngineResult};
use crate::handshake::{Nonce, NonceTracker};
use crate::keys::{
    KeyHierarchyManager, KeyId, KeyRecord, OwnerKind, RevocationEntry, RotationScheduler,
    RotationTransition,
};
use crate::session::SessionManager;
use crate::signer::SecureSigner;

const TOKEN_DOMAIN: &str = "subkey-network/admin-token/v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AdminOperation {
    IssueSubkey {
        owner_kind: OwnerKind,
        label: String,
        #[serde(with = "hex::serde")]
        public_key: Vec<u8>,
    },
    BeginRotation {
        key_id: KeyId,
    },
    ForceRotation {
        key_id: KeyId,
    },
    Revoke {
        key_id: KeyId,
        reason: String,
    },
    TerminateSessionsForKey {
        key_id: KeyId,
    },
}

impl AdminOperation {
    pub fn name(&self) -> &'static str {
        match self {
            AdminOperation::IssueSubkey { .. } => "issue_subkey",
            AdminOperation::BeginRotation { .. } => "begin_rotation",
            AdminOperation::ForceRotation { .. } => "force_rotation",
            AdminOperation::Revoke { .. } => "revoke",
            AdminOperation::TerminateSessionsForKey { .. } => "terminate_sessions_for_key",
        }
    }
}

#[derive(Serialize)]
struct TokenBody<'a> {
    domain: &'static str,
    operation: &'a AdminOperation,
    issued_at: DateTime<Utc>,
    nonce: &'a Nonce,
    signer_key_id: &'a KeyId,
}

/// Master-signed authorization for one administrative operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationToken {
    pub operation: AdminOperation,
    pub issued_at: DateTime<Utc>,
    pub nonce: Nonce,
    pub signer_key_id: KeyId,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

impl AuthorizationToken {
    /// Sign `operation` with the Master key held by `signer`
    pub async fn issue(
        signer: &dyn SecureSigner,
        master: &KeyRecord,
        operation: AdminOperation,
        issued_at: DateTime<Utc>,
    ) -> EngineResult<Self> {
        let mut token = Self {
            operation,
            issued_at,
            nonce: Nonce::random(),
            signer_key_id: master.id.clone(),
            signature: Vec::new(),
        };
        token.signature = signer.sign(master.slot, &token.signed_bytes()?).await?;
        Ok(token)
    }

    /// Canonical bytes covered by the signature
    pub fn signed_bytes(&self) -> EngineResult<Vec<u8>> {
        let body = TokenBody {
            domain: TOKEN_DOMAIN,
            operation: &self.operation,
            issued_at: self.issued_at,
            nonce: &self.nonce,
            signer_key_id: &self.signer_key_id,
        };
        bincode::serialize(&body).map_err(|e| EngineError::Crypto(e.into()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminOutcome {
    Issued(KeyRecord),
    Rotation(RotationTransition),
    Revoked(RevocationEntry),
    SessionsTerminated(usize),
}

pub struct AdminService {
    hierarchy: Arc<KeyHierarchyManager>,
    rotation: Arc<RotationScheduler>,
    sessions: Arc<SessionManager>,
    nonces: NonceTracker,
    clock: Arc<dyn Clock>,
    max_clock_skew: Duration,
}

impl AdminService {
    pub fn new(
        config: &EngineConfig,
        hierarchy: Arc<KeyHierarchyManager>,
        rotation: Arc<RotationScheduler>,
        sessions: Arc<SessionManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            hierarchy,
            rotation,
            sessions,
            nonces: NonceTracker::new(config.nonce_retention()),
            clock,
            max_clock_skew: config.max_clock_skew(),
        }
    }

    /// Validate `token` and run its operation
    ///
    /// # Errors
    ///
    /// - `Unauthorized` if the token was not signed by the registered Master
    /// - `ChainOfTrust` if the Master itself is no longer trusted
    /// - `Signature` if the signature does not verify
    /// - `ClockSkew` if `issued_at` is outside the tolerance
    /// - `NonceReplay` if the token was already used
    /// - whatever the dispatched operation returns
    pub async fn execute(&self, token: &AuthorizationToken) -> EngineResult<AdminOutcome> {
        if let Err(e) = self.authorize(token).await {
            warn!(
                "🚫 Rejected admin {} (nonce {}): {}",
                token.operation.name(),
                token.nonce.prefix(),
                e
            );
            return Err(e);
        }

        info!("🛠️  Admin {} authorized", token.operation.name());
        match &token.operation {
            AdminOperation::IssueSubkey {
                owner_kind,
                label,
                public_key,
            } => self
                .hierarchy
                .issue_subkey(*owner_kind, label, public_key.clone())
                .await
                .map(AdminOutcome::Issued),
            AdminOperation::BeginRotation { key_id } => self
                .rotation
                .begin_rotation(key_id)
                .await
                .map(AdminOutcome::Rotation),
            AdminOperation::ForceRotation { key_id } => self
                .rotation
                .force_rotation(key_id)
                .await
                .map(AdminOutcome::Rotation),
            AdminOperation::Revoke { key_id, reason } => self
                .hierarchy
                .revocations()
                .revoke(key_id, reason)
                .await
                .map(AdminOutcome::Revoked),
            AdminOperation::TerminateSessionsForKey { key_id } => Ok(
                AdminOutcome::SessionsTerminated(self.sessions.terminate_for_key(key_id).await),
            ),
        }
    }

    async fn authorize(&self, token: &AuthorizationToken) -> EngineResult<()> {
        let master = self
            .hierarchy
            .master()
            .await
            .ok_or_else(|| EngineError::Unauthorized {
                reason: "no master key provisioned".to_string(),
            })?;
        if token.signer_key_id != master.id {
            return Err(EngineError::Unauthorized {
                reason: format!("{} is not the master key", token.signer_key_id),
            });
        }
        self.hierarchy.check_chain(&master).await?;

        let signed = token.signed_bytes()?;
        verify_signature(master.algorithm, &master.public_key, &signed, &token.signature)
            .map_err(|e| EngineError::Signature {
                key_id: master.id.clone(),
                reason: e.to_string(),
            })?;

        let now = self.clock.now();
        let drift = if token.issued_at > now {
            token.issued_at - now
        } else {
            now - token.issued_at
        };
        if drift > self.max_clock_skew {
            return Err(EngineError::ClockSkew {
                timestamp: token.issued_at,
                tolerance_seconds: self.max_clock_skew.num_seconds().max(0) as u64,
            });
        }

        self.nonces.check_and_record(&token.nonce, now).await
    }

    /// Forget nonces older than the retention horizon
    pub async fn purge_nonces(&self, now: DateTime<Utc>) -> usize {
        self.nonces.purge(now).await
    }
}
