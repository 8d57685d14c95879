// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Mutual Authentication Handshake
//!
//! Three-message challenge-response between a device and a router:
//!
//! ```text
//! Initiator                                   Responder
//!   Hello{nonce_a, ts, suites, eph_a}  ───▶
//!                                      ◀───  Challenge{nonce_b, ts, record_b, suite, eph_b, sig_b}
//!   Response{record_a, sig_a}          ───▶
//! ```
//!
//! Each side verifies the other's key chain and signature, then derives the
//! shared secret from the ephemeral ECDH output salted with `nonce_a‖nonce_b`.
//! The long-term sub-keys only sign; they never contribute to the secret, so
//! revoking or leaking one later does not expose past sessions.

pub mod messages;
pub mod nonce;
pub mod protocol;

use serde::{Deserialize, Serialize};

pub use messages::{Challenge, CipherSuite, Hello, Nonce, Response, Role, NONCE_LEN};
pub use nonce::NonceTracker;
pub use protocol::{AuthenticationProtocol, HandshakeOutcome, InitiatorHandshake, ResponderHandshake};

/// Per-attempt handshake state
///
/// Initiator: `Init → HelloSent → Verified | Failed`.
/// Responder: `Init → ChallengeSent → ResponseReceived → Verified | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandshakeState {
    Init,
    HelloSent,
    ChallengeSent,
    ResponseReceived,
    Verified,
    Failed,
}

impl HandshakeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Verified | HandshakeState::Failed)
    }
}
