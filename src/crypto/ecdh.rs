// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! ECDH Key Agreement
//!
//! Ephemeral secp256k1 Diffie-Hellman used by the handshake, plus the sealed
//! envelope format consumed by `SecureSigner::decrypt`:
//!
//! ```text
//! [ephemeral public key (33 bytes) | iv (24 bytes) | tag (16 bytes) | ciphertext]
//! ```
//!
//! Every derivation runs the raw ECDH output through HKDF-SHA256 with an
//! explicit salt and info label; the raw point is never used as a key.

use hkdf::Hkdf;
use k256::{
    ecdh::EphemeralSecret,
    elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint},
    EncodedPoint, PublicKey, SecretKey,
};
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::encryption::{self, AeadAlgorithm, TAG_LEN};
use super::CryptoError;

/// Compressed secp256k1 point length
pub const PUBLIC_KEY_LEN: usize = 33;

const ENVELOPE_INFO: &[u8] = b"subkey-network/envelope/v1";

/// One-shot ephemeral key pair for a single handshake
///
/// The secret half is consumed by [`EphemeralKeyPair::agree`] and zeroized on
/// drop by `k256`.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: Vec<u8>,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = PublicKey::from(&secret)
            .to_encoded_point(true)
            .as_bytes()
            .to_vec();
        Self { secret, public }
    }

    /// Compressed SEC1 encoding of the public half
    pub fn public_bytes(&self) -> &[u8] {
        &self.public
    }

    /// Complete the agreement with the peer's ephemeral public key
    ///
    /// Returns `HKDF-SHA256(ikm = ECDH(self, peer), salt, info)` as 32 bytes.
    pub fn agree(
        self,
        peer_public: &[u8],
        salt: &[u8],
        info: &[u8],
    ) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let peer = parse_public_key(peer_public, "peer_ephemeral_public_key")?;
        let shared = self.secret.diffie_hellman(&peer);
        expand(shared.raw_secret_bytes().as_slice(), salt, info, "handshake_agreement")
    }
}

/// Parse a SEC1-encoded secp256k1 public key (33 or 65 bytes)
pub fn parse_public_key(bytes: &[u8], key_type: &str) -> Result<PublicKey, CryptoError> {
    if bytes.len() != 33 && bytes.len() != 65 {
        return Err(CryptoError::InvalidKey {
            key_type: key_type.to_string(),
            reason: format!("expected 33 or 65 bytes, got {}", bytes.len()),
        });
    }

    let encoded = EncodedPoint::from_bytes(bytes).map_err(|e| CryptoError::InvalidKey {
        key_type: key_type.to_string(),
        reason: e.to_string(),
    })?;

    Option::from(PublicKey::from_encoded_point(&encoded)).ok_or_else(|| CryptoError::InvalidKey {
        key_type: key_type.to_string(),
        reason: "point is not on the curve".to_string(),
    })
}

/// Seal `plaintext` so only the holder of `recipient_public_key`'s secret can open it
pub fn seal_envelope(recipient_public_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let recipient = parse_public_key(recipient_public_key, "recipient_public_key")?;
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let eph_public = PublicKey::from(&ephemeral).to_encoded_point(true);

    let shared = ephemeral.diffie_hellman(&recipient);
    let key = expand(
        shared.raw_secret_bytes().as_slice(),
        eph_public.as_bytes(),
        ENVELOPE_INFO,
        "envelope_seal",
    )?;

    let sealed = encryption::seal(
        AeadAlgorithm::XChaCha20Poly1305,
        &key,
        plaintext,
        eph_public.as_bytes(),
    )?;

    let mut envelope =
        Vec::with_capacity(PUBLIC_KEY_LEN + sealed.iv.len() + TAG_LEN + sealed.ciphertext.len());
    envelope.extend_from_slice(eph_public.as_bytes());
    envelope.extend_from_slice(&sealed.iv);
    envelope.extend_from_slice(&sealed.auth_tag);
    envelope.extend_from_slice(&sealed.ciphertext);
    Ok(envelope)
}

/// Open an envelope produced by [`seal_envelope`] with the recipient's static secret
pub fn open_envelope(recipient_secret: &SecretKey, envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let iv_len = AeadAlgorithm::XChaCha20Poly1305.iv_len();
    let header_len = PUBLIC_KEY_LEN + iv_len + TAG_LEN;
    if envelope.len() < header_len {
        return Err(CryptoError::DecryptionFailed {
            operation: "envelope_open".to_string(),
            reason: format!(
                "envelope too short: expected at least {} bytes, got {}",
                header_len,
                envelope.len()
            ),
        });
    }

    let (eph_public, rest) = envelope.split_at(PUBLIC_KEY_LEN);
    let (iv, rest) = rest.split_at(iv_len);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let sender = parse_public_key(eph_public, "envelope_ephemeral_public_key")?;
    let shared = k256::ecdh::diffie_hellman(recipient_secret.to_nonzero_scalar(), sender.as_affine());
    let key = expand(
        shared.raw_secret_bytes().as_slice(),
        eph_public,
        ENVELOPE_INFO,
        "envelope_open",
    )?;

    let mut auth_tag = [0u8; TAG_LEN];
    auth_tag.copy_from_slice(tag);

    encryption::open(
        AeadAlgorithm::XChaCha20Poly1305,
        &key,
        iv,
        ciphertext,
        &auth_tag,
        eph_public,
    )
}

fn expand(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    operation: &str,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = Zeroizing::new([0u8; 32]);
    hkdf.expand(info, &mut okm[..])
        .map_err(|e| CryptoError::KeyDerivationFailed {
            operation: operation.to_string(),
            reason: e.to_string(),
        })?;
    Ok(okm)
}
