// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Cryptographic Primitives
//!
//! Building blocks shared by the handshake and the data path:
//!
//! - **ECDH**: ephemeral secp256k1 agreement and sealed envelopes
//! - **Encryption**: XChaCha20-Poly1305 / AES-256-GCM with detached tags
//! - **Signature**: ECDSA (secp256k1) and Ed25519 verification, key fingerprints
//! - **KDF**: HKDF-SHA256 session key schedule and ratchet
//!
//! ## Security Considerations
//!
//! - Private sub-key material never passes through this module; signing is
//!   done by the injected `SecureSigner`
//! - Derived keys live in zeroizing containers
//! - IVs are random per seal; sequence numbers are carried in the AAD

pub mod ecdh;
pub mod encryption;
pub mod error;
pub mod kdf;
pub mod signature;

pub use ecdh::{open_envelope, seal_envelope, EphemeralKeyPair};
pub use encryption::{open, seal, AeadAlgorithm, SealedData, TAG_LEN};
pub use error::CryptoError;
pub use kdf::SessionKeys;
pub use signature::{fingerprint, verify_signature, SignatureAlgorithm};
