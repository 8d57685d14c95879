// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Key hierarchy records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{fingerprint, SignatureAlgorithm};
use crate::error::EngineResult;
use crate::signer::KeySlot;

/// Key identifier (public key fingerprint)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_public_key(public_key: &[u8]) -> Self {
        Self(fingerprint(public_key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for KeyId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerKind {
    Master,
    Device,
    Router,
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OwnerKind::Master => "master",
            OwnerKind::Device => "device",
            OwnerKind::Router => "router",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyState {
    Active,
    Rotating,
    Revoked,
    Expired,
    Archived,
}

impl KeyState {
    /// States that may still appear on a trusted chain
    pub fn is_trusted(self) -> bool {
        matches!(self, KeyState::Active | KeyState::Rotating)
    }
}

/// A key in the hierarchy
///
/// `certificate` is the Master's signature over [`KeyRecord::signing_payload`].
/// The Master record is self-certified and its `signed_by` is its own id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: KeyId,
    /// Stable identity that survives rotation, e.g. `device-42`
    pub label: String,
    pub owner_kind: OwnerKind,
    pub public_key: Vec<u8>,
    pub algorithm: SignatureAlgorithm,
    pub slot: KeySlot,
    pub created_at: DateTime<Utc>,
    /// `None` for the Master key
    pub expires_at: Option<DateTime<Utc>>,
    pub state: KeyState,
    /// Last state change
    pub updated_at: DateTime<Utc>,
    pub signed_by: KeyId,
    pub certificate: Vec<u8>,
}

#[derive(Serialize)]
struct CertificateBody<'a> {
    domain: &'static str,
    id: &'a KeyId,
    label: &'a str,
    owner_kind: OwnerKind,
    public_key: &'a [u8],
    algorithm: SignatureAlgorithm,
    slot: KeySlot,
    created_at: &'a DateTime<Utc>,
    expires_at: &'a Option<DateTime<Utc>>,
    signed_by: &'a KeyId,
}

impl KeyRecord {
    pub fn is_master(&self) -> bool {
        self.owner_kind == OwnerKind::Master
    }

    /// Canonical encoding of the immutable fields, covered by `certificate`
    ///
    /// Lifecycle fields (`state`, `updated_at`) are excluded so the
    /// certificate stays valid as the key moves through its lifecycle.
    pub fn signing_payload(&self) -> EngineResult<Vec<u8>> {
        let body = CertificateBody {
            domain: "subkey-network/key-record/v1",
            id: &self.id,
            label: &self.label,
            owner_kind: self.owner_kind,
            public_key: &self.public_key,
            algorithm: self.algorithm,
            slot: self.slot,
            created_at: &self.created_at,
            expires_at: &self.expires_at,
            signed_by: &self.signed_by,
        };
        Ok(bincode::serialize(&body).map_err(crate::crypto::CryptoError::from)?)
    }

    /// Whether the record's own lifetime has lapsed at `at`
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires_at| at >= expires_at)
    }
}

/// Append-only revocation log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationEntry {
    pub key_id: KeyId,
    pub reason: String,
    pub revoked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionKind {
    Scheduled,
    Forced,
}

/// Dual-active window between a retiring key and its replacement
///
/// The window is half-open: the old key verifies for `window_start <= t <
/// window_end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationTransition {
    pub id: String,
    pub old_key_id: KeyId,
    pub new_key_id: KeyId,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub kind: TransitionKind,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RotationTransition {
    pub fn is_open_at(&self, at: DateTime<Utc>) -> bool {
        self.completed_at.is_none() && at < self.window_end
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}
