// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Engine Error Taxonomy
//!
//! Every failure surfaced by the engine is an [`EngineError`]. Each variant
//! carries the key and/or session identifiers involved, never key material.
//! [`EngineError::report`] renders the structured operator-facing form
//! (`kind`, `timestamp`, identifiers, message).
//!
//! ## Propagation
//!
//! - Verification failures are terminal for the current handshake attempt
//! - `SignerUnavailable` during rotation aborts only that rotation
//! - `AuthTag` / `Replay` terminate the affected session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::CryptoError;
use crate::handshake::HandshakeState;
use crate::keys::{KeyId, KeyState};

/// Result alias used throughout the engine
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Taxonomy kind of an [`EngineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ChainOfTrust,
    Signature,
    NonceReplay,
    ClockSkew,
    SessionExpired,
    Replay,
    AuthTag,
    RotationConflict,
    SignerUnavailable,
    NotActive,
    KeyNotFound,
    SessionNotFound,
    HandshakeState,
    HandshakeTimeout,
    UnsupportedAlgorithm,
    KeyEpochMismatch,
    RotationWindowOpen,
    TransitionNotFound,
    Unauthorized,
    Storage,
    Crypto,
    Config,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Chain of trust broken at key {key_id}: {reason}")]
    ChainOfTrust { key_id: KeyId, reason: String },

    #[error("Invalid signature from key {key_id}: {reason}")]
    Signature { key_id: KeyId, reason: String },

    #[error("Nonce {nonce_prefix} has already been used")]
    NonceReplay { nonce_prefix: String },

    #[error("Timestamp {timestamp} outside clock skew tolerance of {tolerance_seconds}s")]
    ClockSkew {
        timestamp: DateTime<Utc>,
        tolerance_seconds: u64,
    },

    #[error("Session {session_id} is expired or not active")]
    SessionExpired { session_id: String },

    #[error("Sequence {sequence} replayed on session {session_id}")]
    Replay { session_id: String, sequence: u64 },

    #[error("Packet authentication failed on session {session_id}")]
    AuthTag { session_id: String },

    #[error("Rotation already in progress for key {key_id}")]
    RotationConflict { key_id: KeyId },

    #[error("Secure signer unavailable during {operation}: {reason}")]
    SignerUnavailable { operation: String, reason: String },

    #[error("Key {key_id} is {state:?}, expected Active")]
    NotActive { key_id: KeyId, state: KeyState },

    #[error("Key {key_id} not found")]
    KeyNotFound { key_id: KeyId },

    #[error("Session {session_id} not found")]
    SessionNotFound { session_id: String },

    #[error("Handshake {handshake_id} cannot {action} in state {state:?}")]
    HandshakeState {
        handshake_id: String,
        state: HandshakeState,
        action: String,
    },

    #[error("Handshake {handshake_id} timed out after {elapsed_ms}ms")]
    HandshakeTimeout { handshake_id: String, elapsed_ms: u64 },

    #[error("No mutually supported cipher suite (offered: {offered})")]
    UnsupportedAlgorithm { offered: String },

    #[error("Session {session_id} is at key epoch {expected}, packet uses {received}")]
    KeyEpochMismatch {
        session_id: String,
        expected: u32,
        received: u32,
    },

    #[error("Rotation {transition_id} window is open until {window_end}")]
    RotationWindowOpen {
        transition_id: String,
        window_end: DateTime<Utc>,
    },

    #[error("Rotation transition {transition_id} not found")]
    TransitionNotFound { transition_id: String },

    #[error("Unauthorized administrative operation: {reason}")]
    Unauthorized { reason: String },

    #[error("State store error: {0}")]
    Storage(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ChainOfTrust { .. } => ErrorKind::ChainOfTrust,
            EngineError::Signature { .. } => ErrorKind::Signature,
            EngineError::NonceReplay { .. } => ErrorKind::NonceReplay,
            EngineError::ClockSkew { .. } => ErrorKind::ClockSkew,
            EngineError::SessionExpired { .. } => ErrorKind::SessionExpired,
            EngineError::Replay { .. } => ErrorKind::Replay,
            EngineError::AuthTag { .. } => ErrorKind::AuthTag,
            EngineError::RotationConflict { .. } => ErrorKind::RotationConflict,
            EngineError::SignerUnavailable { .. } => ErrorKind::SignerUnavailable,
            EngineError::NotActive { .. } => ErrorKind::NotActive,
            EngineError::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            EngineError::SessionNotFound { .. } => ErrorKind::SessionNotFound,
            EngineError::HandshakeState { .. } => ErrorKind::HandshakeState,
            EngineError::HandshakeTimeout { .. } => ErrorKind::HandshakeTimeout,
            EngineError::UnsupportedAlgorithm { .. } => ErrorKind::UnsupportedAlgorithm,
            EngineError::KeyEpochMismatch { .. } => ErrorKind::KeyEpochMismatch,
            EngineError::RotationWindowOpen { .. } => ErrorKind::RotationWindowOpen,
            EngineError::TransitionNotFound { .. } => ErrorKind::TransitionNotFound,
            EngineError::Unauthorized { .. } => ErrorKind::Unauthorized,
            EngineError::Storage(_) => ErrorKind::Storage,
            EngineError::Crypto(_) => ErrorKind::Crypto,
            EngineError::Config(_) => ErrorKind::Config,
        }
    }

    /// Key identifier involved, if any
    pub fn key_id(&self) -> Option<&KeyId> {
        match self {
            EngineError::ChainOfTrust { key_id, .. }
            | EngineError::Signature { key_id, .. }
            | EngineError::RotationConflict { key_id }
            | EngineError::NotActive { key_id, .. }
            | EngineError::KeyNotFound { key_id } => Some(key_id),
            _ => None,
        }
    }

    /// Session identifier involved, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            EngineError::SessionExpired { session_id }
            | EngineError::Replay { session_id, .. }
            | EngineError::AuthTag { session_id }
            | EngineError::SessionNotFound { session_id }
            | EngineError::KeyEpochMismatch { session_id, .. } => Some(session_id),
            _ => None,
        }
    }

    /// Tamper detected on the data path; the session must be torn down
    pub fn is_tamper(&self) -> bool {
        matches!(self, EngineError::AuthTag { .. } | EngineError::Replay { .. })
    }

    /// Structured, key-material-free rendering stamped with the current time
    pub fn report(&self) -> ErrorReport {
        self.report_at(Utc::now())
    }

    pub fn report_at(&self, timestamp: DateTime<Utc>) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            timestamp,
            key_id: self.key_id().map(|k| k.to_string()),
            session_id: self.session_id().map(str::to_string),
            message: self.to_string(),
        }
    }
}

/// Operator-visible error record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub timestamp: DateTime<Utc>,
    pub key_id: Option<String>,
    pub session_id: Option<String>,
    pub message: String,
}
