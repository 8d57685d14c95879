// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Handshake message content
//!
//! Messages are plain serde structures; framing and transport belong to the
//! caller. Byte fields use hex in JSON for readability.

use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::AeadAlgorithm;
use crate::keys::KeyRecord;

/// Handshake nonce length in bytes
pub const NONCE_LEN: usize = 32;

const INITIATOR_LABEL: &[u8] = b"subkey-network/handshake/v1/initiator";
const RESPONDER_LABEL: &[u8] = b"subkey-network/handshake/v1/responder";

/// Negotiable cipher suites
///
/// Every suite uses ephemeral secp256k1 ECDH and HKDF-SHA256; they differ in
/// the data-path AEAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CipherSuite {
    Secp256k1XChaCha20Poly1305Sha256,
    Secp256k1Aes256GcmSha256,
}

impl CipherSuite {
    pub fn aead(self) -> AeadAlgorithm {
        match self {
            CipherSuite::Secp256k1XChaCha20Poly1305Sha256 => AeadAlgorithm::XChaCha20Poly1305,
            CipherSuite::Secp256k1Aes256GcmSha256 => AeadAlgorithm::Aes256Gcm,
        }
    }

    fn code(self) -> u8 {
        match self {
            CipherSuite::Secp256k1XChaCha20Poly1305Sha256 => 1,
            CipherSuite::Secp256k1Aes256GcmSha256 => 2,
        }
    }

    /// First suite in `preference` that the peer also offers
    pub fn select(preference: &[CipherSuite], offered: &[CipherSuite]) -> Option<CipherSuite> {
        preference.iter().copied().find(|suite| offered.contains(suite))
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Single-use handshake nonce
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nonce(#[serde(with = "hex_array")] pub [u8; NONCE_LEN]);

impl Nonce {
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }

    /// Short hex prefix for logs and errors
    pub fn prefix(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({}..)", self.prefix())
    }
}

/// Step 1, initiator → responder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub nonce: Nonce,
    pub timestamp: DateTime<Utc>,
    pub supported_algorithms: Vec<CipherSuite>,
    #[serde(with = "hex::serde")]
    pub ephemeral_public_key: Vec<u8>,
}

/// Step 2, responder → initiator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub nonce: Nonce,
    pub timestamp: DateTime<Utc>,
    pub key_record: KeyRecord,
    pub selected_suite: CipherSuite,
    #[serde(with = "hex::serde")]
    pub ephemeral_public_key: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

/// Step 3, initiator → responder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub key_record: KeyRecord,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

/// Which side of the handshake produced a signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Initiator,
    Responder,
}

/// Bytes each side signs
///
/// `role label ‖ nonce_a ‖ nonce_b ‖ eph_a ‖ eph_b ‖ suite`. The role label
/// keeps a responder signature from being reflected as an initiator one.
pub fn transcript(
    role: Role,
    nonce_a: &Nonce,
    nonce_b: &Nonce,
    ephemeral_a: &[u8],
    ephemeral_b: &[u8],
    suite: CipherSuite,
) -> Vec<u8> {
    let label = match role {
        Role::Initiator => INITIATOR_LABEL,
        Role::Responder => RESPONDER_LABEL,
    };
    let mut bytes =
        Vec::with_capacity(label.len() + 2 * NONCE_LEN + ephemeral_a.len() + ephemeral_b.len() + 1);
    bytes.extend_from_slice(label);
    bytes.extend_from_slice(nonce_a.as_bytes());
    bytes.extend_from_slice(nonce_b.as_bytes());
    bytes.extend_from_slice(ephemeral_a);
    bytes.extend_from_slice(ephemeral_b);
    bytes.push(suite.code());
    bytes
}

/// `nonce_a ‖ nonce_b`, the key-agreement salt
pub fn nonce_binding(nonce_a: &Nonce, nonce_b: &Nonce) -> [u8; 2 * NONCE_LEN] {
    let mut salt = [0u8; 2 * NONCE_LEN];
    salt[..NONCE_LEN].copy_from_slice(nonce_a.as_bytes());
    salt[NONCE_LEN..].copy_from_slice(nonce_b.as_bytes());
    salt
}

mod hex_array {
    use super::NONCE_LEN;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; NONCE_LEN], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; NONCE_LEN], D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(text).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|v: Vec<u8>| D::Error::custom(format!("expected {} bytes, got {}", NONCE_LEN, v.len())))
    }
}
