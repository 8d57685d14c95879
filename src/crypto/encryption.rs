// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Authenticated Encryption for the Data Path
//!
//! Seals and opens packet payloads with one of the two negotiable AEADs:
//!
//! - **XChaCha20-Poly1305**: 24-byte IV, 16-byte tag
//! - **AES-256-GCM**: 12-byte IV, 16-byte tag
//!
//! The tag is kept detached from the ciphertext so the packet format can
//! carry `{iv, ciphertext, auth_tag}` as separate fields. IVs are random per
//! call; the per-session sequence number lives in the associated data.

use aes_gcm::Aes256Gcm;
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    Key, Tag, XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use super::CryptoError;

/// Authentication tag length shared by both AEADs
pub const TAG_LEN: usize = 16;

/// AEAD algorithms a cipher suite can select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AeadAlgorithm {
    XChaCha20Poly1305,
    Aes256Gcm,
}

impl AeadAlgorithm {
    /// IV length in bytes
    pub fn iv_len(self) -> usize {
        match self {
            AeadAlgorithm::XChaCha20Poly1305 => 24,
            AeadAlgorithm::Aes256Gcm => 12,
        }
    }
}

/// Output of [`seal`]
#[derive(Debug, Clone)]
pub struct SealedData {
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub auth_tag: [u8; TAG_LEN],
}

/// Encrypt `plaintext` under `key`, binding `aad`
///
/// A fresh random IV of the algorithm's length is generated for every call.
///
/// # Errors
///
/// Returns `CryptoError::EncryptionFailed` if the cipher rejects the input
/// (only possible for absurdly large messages).
pub fn seal(
    algorithm: AeadAlgorithm,
    key: &[u8; 32],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<SealedData, CryptoError> {
    let mut iv = vec![0u8; algorithm.iv_len()];
    OsRng.fill_bytes(&mut iv);

    let mut buffer = plaintext.to_vec();
    let tag = match algorithm {
        AeadAlgorithm::XChaCha20Poly1305 => {
            let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
            cipher
                .encrypt_in_place_detached(XNonce::from_slice(&iv), aad, &mut buffer)
                .map_err(|e| CryptoError::EncryptionFailed {
                    operation: "xchacha20poly1305_seal".to_string(),
                    reason: e.to_string(),
                })?
        }
        AeadAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(key));
            cipher
                .encrypt_in_place_detached(aes_gcm::Nonce::from_slice(&iv), aad, &mut buffer)
                .map_err(|e| CryptoError::EncryptionFailed {
                    operation: "aes256gcm_seal".to_string(),
                    reason: e.to_string(),
                })?
        }
    };

    let mut auth_tag = [0u8; TAG_LEN];
    auth_tag.copy_from_slice(tag.as_slice());

    Ok(SealedData {
        iv,
        ciphertext: buffer,
        auth_tag,
    })
}

/// Decrypt and authenticate a sealed payload
///
/// # Errors
///
/// - `CryptoError::InvalidNonce` if `iv` has the wrong length
/// - `CryptoError::DecryptionFailed` if authentication fails (tampered
///   ciphertext, tag or AAD, or the wrong key)
pub fn open(
    algorithm: AeadAlgorithm,
    key: &[u8; 32],
    iv: &[u8],
    ciphertext: &[u8],
    auth_tag: &[u8; TAG_LEN],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != algorithm.iv_len() {
        return Err(CryptoError::InvalidNonce {
            expected_size: algorithm.iv_len(),
            actual_size: iv.len(),
        });
    }

    let mut buffer = ciphertext.to_vec();
    let result = match algorithm {
        AeadAlgorithm::XChaCha20Poly1305 => {
            let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
            cipher.decrypt_in_place_detached(
                XNonce::from_slice(iv),
                aad,
                &mut buffer,
                Tag::from_slice(auth_tag),
            )
        }
        AeadAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(key));
            cipher.decrypt_in_place_detached(
                aes_gcm::Nonce::from_slice(iv),
                aad,
                &mut buffer,
                aes_gcm::Tag::from_slice(auth_tag),
            )
        }
    };

    result.map_err(|_| CryptoError::DecryptionFailed {
        operation: "aead_open".to_string(),
        reason: "authentication tag mismatch".to_string(),
    })?;

    Ok(buffer)
}
