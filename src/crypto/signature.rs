// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Signature Verification
//!
//! Verifies signatures produced by a `SecureSigner` against the public key
//! recorded in a `KeyRecord`. Two algorithms are accepted:
//!
//! - **EcdsaSecp256k1**: SEC1 public key (33/65 bytes), 64-byte `r || s`
//!   signature over SHA-256 of the message
//! - **Ed25519**: 32-byte public key, 64-byte signature
//!
//! The engine never signs; signing happens inside the hardware token.

use ed25519_dalek::Verifier as _;
use k256::ecdsa::signature::Verifier as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::CryptoError;

/// Signature algorithms a sub-key may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    EcdsaSecp256k1,
    Ed25519,
}

impl SignatureAlgorithm {
    /// Expected public key lengths for this algorithm
    pub fn accepts_public_key_len(self, len: usize) -> bool {
        match self {
            SignatureAlgorithm::EcdsaSecp256k1 => len == 33 || len == 65,
            SignatureAlgorithm::Ed25519 => len == 32,
        }
    }
}

/// Verify `signature` over `message` with `public_key`
///
/// # Errors
///
/// - `CryptoError::InvalidKey` if the public key cannot be parsed
/// - `CryptoError::InvalidSignature` if the signature is malformed or does not
///   verify
pub fn verify_signature(
    algorithm: SignatureAlgorithm,
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    match algorithm {
        SignatureAlgorithm::EcdsaSecp256k1 => {
            let verifying_key = k256::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
                .map_err(|e| CryptoError::InvalidKey {
                    key_type: "ecdsa_secp256k1".to_string(),
                    reason: e.to_string(),
                })?;
            let signature = k256::ecdsa::Signature::from_slice(signature).map_err(|e| {
                CryptoError::InvalidSignature {
                    operation: "ecdsa_parse".to_string(),
                    reason: e.to_string(),
                }
            })?;
            verifying_key
                .verify(message, &signature)
                .map_err(|_| CryptoError::InvalidSignature {
                    operation: "ecdsa_verify".to_string(),
                    reason: "signature does not match message".to_string(),
                })
        }
        SignatureAlgorithm::Ed25519 => {
            let key_bytes: [u8; 32] =
                public_key
                    .try_into()
                    .map_err(|_| CryptoError::InvalidKey {
                        key_type: "ed25519".to_string(),
                        reason: format!("expected 32 bytes, got {}", public_key.len()),
                    })?;
            let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes).map_err(
                |e| CryptoError::InvalidKey {
                    key_type: "ed25519".to_string(),
                    reason: e.to_string(),
                },
            )?;
            let signature = ed25519_dalek::Signature::from_slice(signature).map_err(|e| {
                CryptoError::InvalidSignature {
                    operation: "ed25519_parse".to_string(),
                    reason: e.to_string(),
                }
            })?;
            verifying_key
                .verify(message, &signature)
                .map_err(|_| CryptoError::InvalidSignature {
                    operation: "ed25519_verify".to_string(),
                    reason: "signature does not match message".to_string(),
                })
        }
    }
}

/// Key identifier derived from a public key
///
/// First 16 bytes of SHA-256 over the public key, hex encoded. Stable across
/// processes, so both peers of a handshake name a key identically.
pub fn fingerprint(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    hex::encode(&digest[..16])
}
