// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Data packet format
//!
//! ```text
//! header      = {session_id, sequence, timestamp, key_epoch}   (AEAD associated data)
//! header_mac  = HMAC-SHA256(integrity_key, header ‖ iv)
//! ```
//!
//! The header MAC lets the receiver reject a modified header before touching
//! the ciphertext.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::crypto::{CryptoError, TAG_LEN};

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_MAC_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub session_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub key_epoch: u32,
}

impl PacketHeader {
    /// Canonical encoding used as associated data
    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(bincode::serialize(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub header: PacketHeader,
    #[serde(with = "hex::serde")]
    pub iv: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub auth_tag: [u8; TAG_LEN],
    #[serde(with = "hex::serde")]
    pub header_mac: [u8; HEADER_MAC_LEN],
}

fn header_hmac(integrity_key: &[u8; 32], header: &[u8], iv: &[u8]) -> Result<HmacSha256, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(integrity_key).map_err(|e| CryptoError::InvalidKey {
        key_type: "integrity_key".to_string(),
        reason: e.to_string(),
    })?;
    mac.update(header);
    mac.update(iv);
    Ok(mac)
}

pub fn compute_header_mac(
    integrity_key: &[u8; 32],
    header: &[u8],
    iv: &[u8],
) -> Result<[u8; HEADER_MAC_LEN], CryptoError> {
    let tag = header_hmac(integrity_key, header, iv)?.finalize().into_bytes();
    let mut out = [0u8; HEADER_MAC_LEN];
    out.copy_from_slice(&tag);
    Ok(out)
}

/// Constant-time header MAC check
pub fn verify_header_mac(
    integrity_key: &[u8; 32],
    header: &[u8],
    iv: &[u8],
    expected: &[u8; HEADER_MAC_LEN],
) -> Result<(), CryptoError> {
    header_hmac(integrity_key, header, iv)?
        .verify_slice(expected)
        .map_err(|_| CryptoError::DecryptionFailed {
            operation: "header_mac".to_string(),
            reason: "header authentication failed".to_string(),
        })
}
