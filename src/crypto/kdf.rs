// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Session Key Derivation
//!
//! All session material is derived from the handshake's shared secret with
//! HKDF-SHA256 under the domain-separation salt [`SESSION_DOMAIN`]:
//!
//! ```text
//! chain_secret(0)      = HKDF(secret, info = "chain")
//! session_id           = HKDF(secret, info = "session-id" || min(key_a, key_b) || max(key_a, key_b))
//! enc(sender, epoch)   = HKDF(chain_secret(epoch), info = "enc" || sender_key_id || epoch)
//! mac(sender, epoch)   = HKDF(chain_secret(epoch), info = "mac" || sender_key_id || epoch)
//! chain_secret(n + 1)  = HKDF(chain_secret(n), info = "ratchet")
//! ```
//!
//! Keys are bound to the sending key id so each direction of a session has
//! its own encryption/integrity pair.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::CryptoError;

/// Domain-separation salt for session derivations
pub const SESSION_DOMAIN: &[u8] = b"subkey-network/session/v1";

/// Encryption and integrity key for one direction of a session
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    pub encryption_key: [u8; 32],
    pub integrity_key: [u8; 32],
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKeys { .. }")
    }
}

fn expand_into(
    secret: &[u8],
    info: &[&[u8]],
    out: &mut [u8],
    operation: &str,
) -> Result<(), CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(Some(SESSION_DOMAIN), secret);
    hkdf.expand_multi_info(info, out)
        .map_err(|e| CryptoError::KeyDerivationFailed {
            operation: operation.to_string(),
            reason: e.to_string(),
        })
}

/// Initial ratchet chain secret for a new session
pub fn initial_chain_secret(shared_secret: &[u8]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut out = Zeroizing::new([0u8; 32]);
    expand_into(shared_secret, &[b"chain"], &mut out[..], "chain_secret")?;
    Ok(out)
}

/// Advance the ratchet by one step
///
/// The previous chain secret cannot be recovered from the new one.
pub fn ratchet(chain_secret: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut out = Zeroizing::new([0u8; 32]);
    expand_into(chain_secret, &[b"ratchet"], &mut out[..], "ratchet")?;
    Ok(out)
}

/// Session identifier both peers compute identically
pub fn derive_session_id(
    shared_secret: &[u8],
    local_key_id: &str,
    peer_key_id: &str,
) -> Result<String, CryptoError> {
    let (first, second) = if local_key_id <= peer_key_id {
        (local_key_id, peer_key_id)
    } else {
        (peer_key_id, local_key_id)
    };

    let mut out = [0u8; 16];
    expand_into(
        shared_secret,
        &[b"session-id", first.as_bytes(), b"|", second.as_bytes()],
        &mut out,
        "session_id",
    )?;
    Ok(hex::encode(out))
}

/// Keys protecting traffic sent by `sender_key_id` during `epoch`
pub fn derive_direction_keys(
    chain_secret: &[u8; 32],
    sender_key_id: &str,
    epoch: u32,
) -> Result<SessionKeys, CryptoError> {
    let epoch_bytes = epoch.to_be_bytes();
    let mut keys = SessionKeys {
        encryption_key: [0u8; 32],
        integrity_key: [0u8; 32],
    };
    expand_into(
        chain_secret,
        &[b"enc", sender_key_id.as_bytes(), &epoch_bytes],
        &mut keys.encryption_key,
        "encryption_key",
    )?;
    expand_into(
        chain_secret,
        &[b"mac", sender_key_id.as_bytes(), &epoch_bytes],
        &mut keys.integrity_key,
        "integrity_key",
    )?;
    Ok(keys)
}
