// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Crypto Error Types
//!
//! Error type for the low-level primitives (AEAD, key agreement, signatures,
//! key derivation). Engine components translate these into the engine
//! taxonomy ([`crate::error::EngineError`]) with session/key context attached.
//!
//! ## Error Variants
//!
//! - **DecryptionFailed**: AEAD open failed (wrong key, tampered ciphertext or AAD)
//! - **EncryptionFailed**: AEAD seal failed
//! - **InvalidSignature**: signature malformed or not valid for the message
//! - **InvalidKey**: public key bytes malformed or of the wrong algorithm
//! - **InvalidNonce**: IV size does not match the selected AEAD
//! - **KeyDerivationFailed**: ECDH or HKDF derivation failed
//! - **Encoding**: canonical encoding of a signed structure failed

use std::fmt;

/// Error type for cryptographic primitives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD decryption failed
    ///
    /// Authentication tag verification failed, meaning the ciphertext, the
    /// associated data, or the key does not match.
    DecryptionFailed {
        /// Which operation was being performed
        operation: String,
        /// Specific failure reason
        reason: String,
    },

    /// AEAD encryption failed
    EncryptionFailed {
        /// Which operation was being performed
        operation: String,
        /// Specific failure reason
        reason: String,
    },

    /// Signature could not be parsed or does not verify
    InvalidSignature {
        /// Which operation was being performed
        operation: String,
        /// Specific failure reason
        reason: String,
    },

    /// Invalid public key
    InvalidKey {
        /// Type of key that failed (e.g., "ephemeral_public_key", "subkey")
        key_type: String,
        /// Specific failure reason
        reason: String,
    },

    /// IV has the wrong length for the selected AEAD
    InvalidNonce {
        /// Expected IV size
        expected_size: usize,
        /// Actual IV size provided
        actual_size: usize,
    },

    /// Key derivation failed (ECDH or HKDF)
    KeyDerivationFailed {
        /// Which key derivation operation failed
        operation: String,
        /// Specific failure reason
        reason: String,
    },

    /// Canonical encoding failed
    Encoding(String),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::DecryptionFailed { operation, reason } => {
                write!(f, "Decryption failed during {}: {}", operation, reason)
            }
            CryptoError::EncryptionFailed { operation, reason } => {
                write!(f, "Encryption failed during {}: {}", operation, reason)
            }
            CryptoError::InvalidSignature { operation, reason } => {
                write!(f, "Invalid signature during {}: {}", operation, reason)
            }
            CryptoError::InvalidKey { key_type, reason } => {
                write!(f, "Invalid key ({}): {}", key_type, reason)
            }
            CryptoError::InvalidNonce {
                expected_size,
                actual_size,
            } => {
                write!(
                    f,
                    "Invalid nonce size: expected {} bytes, got {} bytes",
                    expected_size, actual_size
                )
            }
            CryptoError::KeyDerivationFailed { operation, reason } => {
                write!(f, "Key derivation failed during {}: {}", operation, reason)
            }
            CryptoError::Encoding(msg) => {
                write!(f, "Encoding error: {}", msg)
            }
        }
    }
}

impl std::error::Error for CryptoError {}

// Conversion from k256 errors (elliptic curve operations)
impl From<k256::elliptic_curve::Error> for CryptoError {
    fn from(err: k256::elliptic_curve::Error) -> Self {
        CryptoError::InvalidKey {
            key_type: "secp256k1".to_string(),
            reason: format!("k256 error: {}", err),
        }
    }
}

// Conversion from bincode errors (canonical encodings)
impl From<bincode::Error> for CryptoError {
    fn from(err: bincode::Error) -> Self {
        CryptoError::Encoding(err.to_string())
    }
}
