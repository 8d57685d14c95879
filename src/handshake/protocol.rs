// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Handshake state machines
//!
//! An [`AuthenticationProtocol`] is one party's view: its label, its signer
//! and the shared key hierarchy. Each attempt lives in an
//! [`InitiatorHandshake`] or [`ResponderHandshake`] owned by the caller; a
//! failed attempt drops its ephemeral secret and can never reach `Verified`.
//!
//! Chains (peer and own) are re-verified at every step, so a revocation that
//! lands mid-handshake fails the attempt at its next step.

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::messages::{
    nonce_binding, transcript, Challenge, CipherSuite, Hello, Nonce, Response, Role,
};
use super::{HandshakeState, NonceTracker};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::crypto::{ecdh::parse_public_key, verify_signature, EphemeralKeyPair};
use crate::error::{EngineError, EngineResult};
use crate::keys::{KeyHierarchyManager, KeyId, KeyRecord};
use crate::signer::{KeySlot, SecureSigner};

const SHARED_SECRET_INFO: &[u8] = b"subkey-network/handshake/v1/shared-secret";

/// Result of a verified handshake
pub struct HandshakeOutcome {
    pub handshake_id: String,
    pub role: Role,
    pub local_key_id: KeyId,
    /// Validated peer identity
    pub peer: KeyRecord,
    pub suite: CipherSuite,
    shared_secret: Zeroizing<[u8; 32]>,
}

impl HandshakeOutcome {
    pub fn peer_key_id(&self) -> &KeyId {
        &self.peer.id
    }

    pub fn shared_secret(&self) -> &[u8; 32] {
        &self.shared_secret
    }
}

impl fmt::Debug for HandshakeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeOutcome")
            .field("handshake_id", &self.handshake_id)
            .field("role", &self.role)
            .field("local_key_id", &self.local_key_id)
            .field("peer_key_id", &self.peer.id)
            .field("suite", &self.suite)
            .finish_non_exhaustive()
    }
}

struct Attempt {
    id: String,
    state: HandshakeState,
    started_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
    local_key_id: KeyId,
    ephemeral: Option<EphemeralKeyPair>,
    /// Peer nonce recorded in the tracker on this attempt's behalf
    peer_nonce: Option<Nonce>,
}

impl Attempt {
    fn new(local_key_id: KeyId, now: DateTime<Utc>, timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state: HandshakeState::Init,
            started_at: now,
            deadline: now + timeout,
            local_key_id,
            ephemeral: None,
            peer_nonce: None,
        }
    }

    fn expect(&self, state: HandshakeState, action: &str) -> EngineResult<()> {
        if self.state != state {
            return Err(EngineError::HandshakeState {
                handshake_id: self.id.clone(),
                state: self.state,
                action: action.to_string(),
            });
        }
        Ok(())
    }

    fn fail(&mut self, error: &EngineError) {
        if self.state.is_terminal() {
            return;
        }
        warn!("Handshake {} failed in {:?}: {}", self.id, self.state, error);
        self.state = HandshakeState::Failed;
        self.ephemeral = None;
    }

    fn take_ephemeral(&mut self) -> EngineResult<EphemeralKeyPair> {
        self.ephemeral.take().ok_or_else(|| EngineError::HandshakeState {
            handshake_id: self.id.clone(),
            state: self.state,
            action: "derive shared secret".to_string(),
        })
    }
}

/// Initiator side of one handshake attempt
pub struct InitiatorHandshake {
    attempt: Attempt,
    hello: Hello,
}

impl InitiatorHandshake {
    pub fn id(&self) -> &str {
        &self.attempt.id
    }

    pub fn state(&self) -> HandshakeState {
        self.attempt.state
    }
}

/// Responder side of one handshake attempt
pub struct ResponderHandshake {
    attempt: Attempt,
    nonce_a: Nonce,
    nonce_b: Nonce,
    ephemeral_a: Vec<u8>,
    ephemeral_b: Vec<u8>,
    suite: CipherSuite,
}

impl fmt::Debug for ResponderHandshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponderHandshake")
            .field("id", &self.attempt.id)
            .field("state", &self.attempt.state)
            .field("suite", &self.suite)
            .finish_non_exhaustive()
    }
}

impl ResponderHandshake {
    pub fn id(&self) -> &str {
        &self.attempt.id
    }

    pub fn state(&self) -> HandshakeState {
        self.attempt.state
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }
}

/// One party's handshake driver
#[derive(Clone)]
pub struct AuthenticationProtocol {
    label: String,
    signer: Arc<dyn SecureSigner>,
    hierarchy: Arc<KeyHierarchyManager>,
    nonces: Arc<NonceTracker>,
    clock: Arc<dyn Clock>,
    suites: Vec<CipherSuite>,
    max_clock_skew: Duration,
    timeout: Duration,
}

impl fmt::Debug for AuthenticationProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationProtocol")
            .field("label", &self.label)
            .field("suites", &self.suites)
            .finish_non_exhaustive()
    }
}

impl AuthenticationProtocol {
    pub fn new(
        config: &EngineConfig,
        label: impl Into<String>,
        signer: Arc<dyn SecureSigner>,
        hierarchy: Arc<KeyHierarchyManager>,
        nonces: Arc<NonceTracker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            label: label.into(),
            signer,
            hierarchy,
            nonces,
            clock,
            suites: config.handshake.cipher_suites.clone(),
            max_clock_skew: config.max_clock_skew(),
            timeout: config.handshake_timeout(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Start a handshake as initiator
    pub async fn initiate(&self) -> EngineResult<(InitiatorHandshake, Hello)> {
        let own = self.own_key().await?;
        let now = self.clock.now();

        let mut attempt = Attempt::new(own.id.clone(), now, self.timeout);
        let ephemeral = EphemeralKeyPair::generate();
        let hello = Hello {
            nonce: Nonce::random(),
            timestamp: now,
            supported_algorithms: self.suites.clone(),
            ephemeral_public_key: ephemeral.public_bytes().to_vec(),
        };
        attempt.ephemeral = Some(ephemeral);
        attempt.state = HandshakeState::HelloSent;

        debug!(
            "Handshake {} started by {} (nonce {})",
            attempt.id,
            self.label,
            hello.nonce.prefix()
        );
        Ok((
            InitiatorHandshake {
                attempt,
                hello: hello.clone(),
            },
            hello,
        ))
    }

    /// Answer a `Hello` as responder
    ///
    /// On failure no attempt is created.
    pub async fn handle_hello(&self, hello: &Hello) -> EngineResult<(ResponderHandshake, Challenge)> {
        let now = self.clock.now();
        let result = self.process_hello(hello, now).await;
        if let Err(e) = &result {
            if matches!(e, EngineError::HandshakeTimeout { .. }) {
                self.nonces.release(&hello.nonce).await;
            }
            warn!(
                "Rejected Hello (nonce {}) at {}: {}",
                hello.nonce.prefix(),
                self.label,
                e
            );
        }
        result
    }

    async fn process_hello(
        &self,
        hello: &Hello,
        now: DateTime<Utc>,
    ) -> EngineResult<(ResponderHandshake, Challenge)> {
        self.check_skew(hello.timestamp, now)?;
        self.nonces.check_and_record(&hello.nonce, now).await?;

        let suite = CipherSuite::select(&self.suites, &hello.supported_algorithms).ok_or_else(
            || EngineError::UnsupportedAlgorithm {
                offered: format!("{:?}", hello.supported_algorithms),
            },
        )?;
        parse_public_key(&hello.ephemeral_public_key, "initiator_ephemeral_public_key")?;

        let own = self.own_key().await?;
        let mut attempt = Attempt::new(own.id.clone(), now, self.timeout);
        attempt.peer_nonce = Some(hello.nonce);
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_b = ephemeral.public_bytes().to_vec();
        let nonce_b = Nonce::random();

        let signed = transcript(
            Role::Responder,
            &hello.nonce,
            &nonce_b,
            &hello.ephemeral_public_key,
            &ephemeral_b,
            suite,
        );
        let signature = self.sign_within(&attempt, own.slot, &signed).await?;
        let own = self.recheck_own(&attempt.local_key_id).await?;

        attempt.ephemeral = Some(ephemeral);
        attempt.state = HandshakeState::ChallengeSent;

        let challenge = Challenge {
            nonce: nonce_b,
            timestamp: self.clock.now(),
            key_record: own,
            selected_suite: suite,
            ephemeral_public_key: ephemeral_b.clone(),
            signature,
        };
        debug!("Handshake {} challenged by {} using {}", attempt.id, self.label, suite);

        Ok((
            ResponderHandshake {
                attempt,
                nonce_a: hello.nonce,
                nonce_b,
                ephemeral_a: hello.ephemeral_public_key.clone(),
                ephemeral_b,
                suite,
            },
            challenge,
        ))
    }

    /// Verify the responder's `Challenge` and produce the `Response`
    pub async fn handle_challenge(
        &self,
        handshake: &mut InitiatorHandshake,
        challenge: &Challenge,
    ) -> EngineResult<(Response, HandshakeOutcome)> {
        let result = self.process_challenge(handshake, challenge).await;
        if let Err(e) = &result {
            handshake.attempt.fail(e);
            self.release_on_timeout(&mut handshake.attempt, e).await;
        }
        result
    }

    async fn process_challenge(
        &self,
        handshake: &mut InitiatorHandshake,
        challenge: &Challenge,
    ) -> EngineResult<(Response, HandshakeOutcome)> {
        handshake
            .attempt
            .expect(HandshakeState::HelloSent, "process challenge")?;
        self.remaining(&handshake.attempt)?;

        let now = self.clock.now();
        self.check_skew(challenge.timestamp, now)?;
        self.nonces.check_and_record(&challenge.nonce, now).await?;
        handshake.attempt.peer_nonce = Some(challenge.nonce);

        let suite = challenge.selected_suite;
        if !handshake.hello.supported_algorithms.contains(&suite) {
            return Err(EngineError::UnsupportedAlgorithm {
                offered: suite.to_string(),
            });
        }

        let hello = &handshake.hello;
        let responder_signed = transcript(
            Role::Responder,
            &hello.nonce,
            &challenge.nonce,
            &hello.ephemeral_public_key,
            &challenge.ephemeral_public_key,
            suite,
        );
        self.verify_peer(&challenge.key_record, &responder_signed, &challenge.signature)
            .await?;

        let own = self.recheck_own(&handshake.attempt.local_key_id).await?;
        let initiator_signed = transcript(
            Role::Initiator,
            &hello.nonce,
            &challenge.nonce,
            &hello.ephemeral_public_key,
            &challenge.ephemeral_public_key,
            suite,
        );
        let signature = self
            .sign_within(&handshake.attempt, own.slot, &initiator_signed)
            .await?;

        // the signer await may have outlived a revocation
        let own = self.recheck_own(&own.id).await?;
        self.hierarchy.check_chain(&challenge.key_record).await?;

        let salt = nonce_binding(&hello.nonce, &challenge.nonce);
        let shared_secret = handshake.attempt.take_ephemeral()?.agree(
            &challenge.ephemeral_public_key,
            &salt,
            SHARED_SECRET_INFO,
        )?;
        handshake.attempt.state = HandshakeState::Verified;

        info!(
            "🤝 Handshake {} verified: {} ↔ {} ({})",
            handshake.attempt.id, own.id, challenge.key_record.id, suite
        );
        let outcome = HandshakeOutcome {
            handshake_id: handshake.attempt.id.clone(),
            role: Role::Initiator,
            local_key_id: own.id.clone(),
            peer: challenge.key_record.clone(),
            suite,
            shared_secret,
        };
        let response = Response {
            key_record: own,
            signature,
        };
        Ok((response, outcome))
    }

    /// Verify the initiator's `Response`
    pub async fn handle_response(
        &self,
        handshake: &mut ResponderHandshake,
        response: &Response,
    ) -> EngineResult<HandshakeOutcome> {
        let result = self.process_response(handshake, response).await;
        if let Err(e) = &result {
            handshake.attempt.fail(e);
            self.release_on_timeout(&mut handshake.attempt, e).await;
        }
        result
    }

    async fn process_response(
        &self,
        handshake: &mut ResponderHandshake,
        response: &Response,
    ) -> EngineResult<HandshakeOutcome> {
        handshake
            .attempt
            .expect(HandshakeState::ChallengeSent, "process response")?;
        handshake.attempt.state = HandshakeState::ResponseReceived;
        self.remaining(&handshake.attempt)?;

        let initiator_signed = transcript(
            Role::Initiator,
            &handshake.nonce_a,
            &handshake.nonce_b,
            &handshake.ephemeral_a,
            &handshake.ephemeral_b,
            handshake.suite,
        );
        self.verify_peer(&response.key_record, &initiator_signed, &response.signature)
            .await?;
        let own = self.recheck_own(&handshake.attempt.local_key_id).await?;

        let salt = nonce_binding(&handshake.nonce_a, &handshake.nonce_b);
        let shared_secret = handshake.attempt.take_ephemeral()?.agree(
            &handshake.ephemeral_a,
            &salt,
            SHARED_SECRET_INFO,
        )?;
        handshake.attempt.state = HandshakeState::Verified;

        info!(
            "🤝 Handshake {} verified: {} ↔ {} ({})",
            handshake.attempt.id, own.id, response.key_record.id, handshake.suite
        );
        Ok(HandshakeOutcome {
            handshake_id: handshake.attempt.id.clone(),
            role: Role::Responder,
            local_key_id: own.id,
            peer: response.key_record.clone(),
            suite: handshake.suite,
            shared_secret,
        })
    }

    async fn release_on_timeout(&self, attempt: &mut Attempt, error: &EngineError) {
        if !matches!(error, EngineError::HandshakeTimeout { .. }) {
            return;
        }
        if let Some(nonce) = attempt.peer_nonce.take() {
            if self.nonces.release(&nonce).await {
                debug!("Handshake {} released nonce {}", attempt.id, nonce.prefix());
            }
        }
    }

    /// Our current signing key, verified
    async fn own_key(&self) -> EngineResult<KeyRecord> {
        let own = self
            .hierarchy
            .current_key(&self.label)
            .await
            .ok_or_else(|| EngineError::KeyNotFound {
                key_id: KeyId::from(self.label.as_str()),
            })?;
        self.hierarchy.check_chain(&own).await?;
        Ok(own)
    }

    /// The key this attempt started with, still trusted
    async fn recheck_own(&self, key_id: &KeyId) -> EngineResult<KeyRecord> {
        let own = self
            .hierarchy
            .lookup(key_id)
            .await
            .ok_or_else(|| EngineError::KeyNotFound {
                key_id: key_id.clone(),
            })?;
        self.hierarchy.check_chain(&own).await?;
        Ok(own)
    }

    async fn verify_peer(
        &self,
        presented: &KeyRecord,
        signed: &[u8],
        signature: &[u8],
    ) -> EngineResult<()> {
        self.hierarchy.check_chain(presented).await?;
        if presented.is_master() {
            return Err(EngineError::ChainOfTrust {
                key_id: presented.id.clone(),
                reason: "the master key does not take part in handshakes".to_string(),
            });
        }
        verify_signature(presented.algorithm, &presented.public_key, signed, signature).map_err(
            |e| EngineError::Signature {
                key_id: presented.id.clone(),
                reason: e.to_string(),
            },
        )
    }

    fn check_skew(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> EngineResult<()> {
        let drift = if timestamp > now {
            timestamp - now
        } else {
            now - timestamp
        };
        if drift > self.max_clock_skew {
            return Err(EngineError::ClockSkew {
                timestamp,
                tolerance_seconds: self.max_clock_skew.num_seconds().max(0) as u64,
            });
        }
        Ok(())
    }

    /// Time left before the attempt's deadline
    fn remaining(&self, attempt: &Attempt) -> EngineResult<std::time::Duration> {
        let now = self.clock.now();
        if now >= attempt.deadline {
            return Err(timeout_error(attempt, now));
        }
        (attempt.deadline - now)
            .to_std()
            .map_err(|_| timeout_error(attempt, now))
    }

    async fn sign_within(
        &self,
        attempt: &Attempt,
        slot: KeySlot,
        data: &[u8],
    ) -> EngineResult<Vec<u8>> {
        let remaining = self.remaining(attempt)?;
        match tokio::time::timeout(remaining, self.signer.sign(slot, data)).await {
            Ok(signature) => signature,
            Err(_) => Err(EngineError::HandshakeTimeout {
                handshake_id: attempt.id.clone(),
                elapsed_ms: (attempt.deadline - attempt.started_at)
                    .num_milliseconds()
                    .max(0) as u64,
            }),
        }
    }
}

fn timeout_error(attempt: &Attempt, now: DateTime<Utc>) -> EngineError {
    EngineError::HandshakeTimeout {
        handshake_id: attempt.id.clone(),
        elapsed_ms: (now - attempt.started_at).num_milliseconds().max(0) as u64,
    }
}
