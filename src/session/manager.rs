// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Session Manager
//!
//! Owns every live session and all data-path cryptography. Each session sits
//! behind its own mutex; the session map lock is only held to look up,
//! insert or remove entries, never across packet processing.
//!
//! Key material lives in [`SessionMaterial`] and is dropped (and zeroized)
//! the moment a session expires, is terminated, or sees tampering.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::packet::{compute_header_mac, verify_header_mac, Packet, PacketHeader};
use super::replay::ReplayWindow;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::crypto::{kdf, open, seal, CryptoError, SessionKeys};
use crate::error::{EngineError, EngineResult};
use crate::handshake::{CipherSuite, HandshakeOutcome};
use crate::keys::KeyId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Establishing,
    Active,
    Refreshing,
    Expired,
    Terminated,
}

/// Key-free view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub local_key_id: KeyId,
    pub peer_key_id: KeyId,
    pub suite: CipherSuite,
    pub key_epoch: u32,
    pub sequence_send: u64,
    pub sequence_recv: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: SessionState,
}

struct SessionMaterial {
    outbound: SessionKeys,
    inbound: SessionKeys,
    chain_secret: Zeroizing<[u8; 32]>,
}

impl SessionMaterial {
    fn derive(
        chain_secret: Zeroizing<[u8; 32]>,
        local_key_id: &KeyId,
        peer_key_id: &KeyId,
        epoch: u32,
    ) -> Result<Self, CryptoError> {
        Ok(Self {
            outbound: kdf::derive_direction_keys(&chain_secret, local_key_id.as_str(), epoch)?,
            inbound: kdf::derive_direction_keys(&chain_secret, peer_key_id.as_str(), epoch)?,
            chain_secret,
        })
    }
}

struct LiveSession {
    record: SessionRecord,
    material: Option<SessionMaterial>,
    replay: ReplayWindow,
}

impl LiveSession {
    fn wipe(&mut self, state: SessionState) {
        self.material = None;
        self.record.state = state;
    }

    /// `SessionExpired` unless Active and unexpired; expires lazily
    fn ensure_usable(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        if self.record.state == SessionState::Active && now >= self.record.expires_at {
            info!("⌛ Session {} expired", self.record.session_id);
            self.wipe(SessionState::Expired);
        }
        if self.record.state != SessionState::Active {
            return Err(self.expired());
        }
        Ok(())
    }

    fn material(&self) -> EngineResult<&SessionMaterial> {
        self.material.as_ref().ok_or_else(|| self.expired())
    }

    fn expired(&self) -> EngineError {
        EngineError::SessionExpired {
            session_id: self.record.session_id.clone(),
        }
    }

    /// Tear the session down after tampering and build the error
    fn tamper(&mut self, error: EngineError) -> EngineError {
        warn!(
            "🚨 Terminating session {}: {}",
            self.record.session_id, error
        );
        self.wipe(SessionState::Terminated);
        error
    }
}

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Mutex<LiveSession>>>>,
    clock: Arc<dyn Clock>,
    lifetime: Duration,
    max_age: Duration,
    replay_window: u64,
}

impl SessionManager {
    pub fn new(config: &EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            clock,
            lifetime: config.session_lifetime(),
            max_age: config.max_session_age(),
            replay_window: config.session.replay_window_size,
        }
    }

    /// Create a session from a verified handshake
    pub async fn establish_from(&self, outcome: &HandshakeOutcome) -> EngineResult<SessionRecord> {
        self.establish(
            outcome.shared_secret(),
            &outcome.local_key_id,
            outcome.peer_key_id(),
            outcome.suite,
        )
        .await
    }

    /// Derive and publish a new session
    ///
    /// The record is built in `Establishing` and becomes `Active` as it is
    /// inserted; on any failure nothing is published.
    pub async fn establish(
        &self,
        shared_secret: &[u8],
        local_key_id: &KeyId,
        peer_key_id: &KeyId,
        suite: CipherSuite,
    ) -> EngineResult<SessionRecord> {
        let session_id =
            kdf::derive_session_id(shared_secret, local_key_id.as_str(), peer_key_id.as_str())?;
        let chain_secret = kdf::initial_chain_secret(shared_secret)?;
        let material = SessionMaterial::derive(chain_secret, local_key_id, peer_key_id, 0)?;

        let now = self.clock.now();
        let mut record = SessionRecord {
            session_id: session_id.clone(),
            local_key_id: local_key_id.clone(),
            peer_key_id: peer_key_id.clone(),
            suite,
            key_epoch: 0,
            sequence_send: 0,
            sequence_recv: 0,
            created_at: now,
            expires_at: now + self.lifetime.min(self.max_age),
            state: SessionState::Establishing,
        };

        let mut live = LiveSession {
            record: record.clone(),
            material: Some(material),
            replay: ReplayWindow::new(self.replay_window),
        };

        match self.sessions.write().await.entry(session_id.clone()) {
            Entry::Occupied(_) => {
                return Err(CryptoError::KeyDerivationFailed {
                    operation: "establish".to_string(),
                    reason: format!("session id {} already in use", session_id),
                }
                .into())
            }
            Entry::Vacant(slot) => {
                record.state = SessionState::Active;
                live.record.state = SessionState::Active;
                slot.insert(Arc::new(Mutex::new(live)));
            }
        }

        info!(
            "🔐 Session {} established: {} → {} ({}, expires {})",
            session_id,
            local_key_id,
            peer_key_id,
            suite,
            record.expires_at.to_rfc3339()
        );
        Ok(record)
    }

    /// Encrypt `plaintext` as the next outbound packet
    pub async fn encrypt(&self, session_id: &str, plaintext: &[u8]) -> EngineResult<Packet> {
        let session = self.session(session_id).await?;
        let mut live = session.lock().await;
        let now = self.clock.now();
        live.ensure_usable(now)?;

        let sequence = live
            .record
            .sequence_send
            .checked_add(1)
            .ok_or_else(|| live.expired())?;
        let header = PacketHeader {
            session_id: session_id.to_string(),
            sequence,
            timestamp: now,
            key_epoch: live.record.key_epoch,
        };
        let header_bytes = header.to_bytes()?;

        let (sealed, header_mac) = {
            let material = live.material()?;
            let sealed = seal(
                live.record.suite.aead(),
                &material.outbound.encryption_key,
                plaintext,
                &header_bytes,
            )?;
            let header_mac = compute_header_mac(
                &material.outbound.integrity_key,
                &header_bytes,
                &sealed.iv,
            )?;
            (sealed, header_mac)
        };
        live.record.sequence_send = sequence;

        debug!("Session {} sealed packet {}", session_id, sequence);
        Ok(Packet {
            header,
            iv: sealed.iv,
            ciphertext: sealed.ciphertext,
            auth_tag: sealed.auth_tag,
            header_mac,
        })
    }

    /// Authenticate and decrypt an inbound packet
    ///
    /// # Errors
    ///
    /// - `SessionExpired` if the session is past expiry or not Active
    /// - `KeyEpochMismatch` if the packet is from another key epoch
    ///   (session kept)
    /// - `AuthTag` on header MAC or AEAD failure (session terminated)
    /// - `Replay` on a sequence at/below the window floor or already
    ///   accepted (session terminated)
    pub async fn decrypt(&self, session_id: &str, packet: &Packet) -> EngineResult<Vec<u8>> {
        let session = self.session(session_id).await?;
        let mut live = session.lock().await;
        let now = self.clock.now();
        live.ensure_usable(now)?;

        if packet.header.key_epoch != live.record.key_epoch {
            return Err(EngineError::KeyEpochMismatch {
                session_id: session_id.to_string(),
                expected: live.record.key_epoch,
                received: packet.header.key_epoch,
            });
        }

        let header_bytes = packet.header.to_bytes()?;
        let header_ok = {
            let material = live.material()?;
            packet.header.session_id == session_id
                && verify_header_mac(
                    &material.inbound.integrity_key,
                    &header_bytes,
                    &packet.iv,
                    &packet.header_mac,
                )
                .is_ok()
        };
        if !header_ok {
            return Err(live.tamper(EngineError::AuthTag {
                session_id: session_id.to_string(),
            }));
        }

        let sequence = packet.header.sequence;
        if let Err(rejection) = live.replay.check(sequence) {
            debug!(
                "Session {} rejected sequence {} ({:?})",
                session_id, sequence, rejection
            );
            return Err(live.tamper(EngineError::Replay {
                session_id: session_id.to_string(),
                sequence,
            }));
        }

        let opened = {
            let material = live.material()?;
            open(
                live.record.suite.aead(),
                &material.inbound.encryption_key,
                &packet.iv,
                &packet.ciphertext,
                &packet.auth_tag,
                &header_bytes,
            )
        };
        let plaintext = match opened {
            Ok(plaintext) => plaintext,
            Err(_) => {
                return Err(live.tamper(EngineError::AuthTag {
                    session_id: session_id.to_string(),
                }))
            }
        };

        live.replay.record(sequence);
        live.record.sequence_recv = live.record.sequence_recv.max(sequence);
        debug!("Session {} opened packet {}", session_id, sequence);
        Ok(plaintext)
    }

    /// Ratchet the session keys forward, keeping the session id
    ///
    /// Both peers must refresh to stay in step; packets from the other epoch
    /// fail with `KeyEpochMismatch`. A failed ratchet leaves the session
    /// Expired.
    pub async fn refresh(&self, session_id: &str) -> EngineResult<SessionRecord> {
        let session = self.session(session_id).await?;
        let mut live = session.lock().await;
        let now = self.clock.now();
        live.ensure_usable(now)?;
        let chain_secret = live.material()?.chain_secret.clone();
        live.record.state = SessionState::Refreshing;

        let next_epoch = live.record.key_epoch.checked_add(1);
        let ratcheted = next_epoch
            .ok_or_else(|| CryptoError::KeyDerivationFailed {
                operation: "refresh".to_string(),
                reason: "key epoch exhausted".to_string(),
            })
            .and_then(|epoch| {
                let next = kdf::ratchet(&chain_secret)?;
                SessionMaterial::derive(
                    next,
                    &live.record.local_key_id,
                    &live.record.peer_key_id,
                    epoch,
                )
                .map(|material| (epoch, material))
            });

        match ratcheted {
            Ok((epoch, material)) => {
                live.material = Some(material);
                live.record.key_epoch = epoch;
                live.record.expires_at =
                    (now + self.lifetime).min(live.record.created_at + self.max_age);
                live.record.state = SessionState::Active;
                info!(
                    "🔁 Session {} refreshed to epoch {} (expires {})",
                    session_id,
                    epoch,
                    live.record.expires_at.to_rfc3339()
                );
                Ok(live.record.clone())
            }
            Err(e) => {
                warn!("Session {} refresh failed, expiring: {}", session_id, e);
                live.wipe(SessionState::Expired);
                Err(e.into())
            }
        }
    }

    /// Wipe keys and mark the session Terminated
    pub async fn terminate(&self, session_id: &str) -> EngineResult<()> {
        let session = self.session(session_id).await?;
        let mut live = session.lock().await;
        if live.record.state != SessionState::Terminated {
            live.wipe(SessionState::Terminated);
            info!("🗑️  Session {} terminated", session_id);
        }
        Ok(())
    }

    /// Terminate every session using `key_id` on either side
    pub async fn terminate_for_key(&self, key_id: &KeyId) -> usize {
        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();

        let terminated = join_all(sessions.into_iter().map(|session| async move {
            let mut live = session.lock().await;
            let involved =
                &live.record.local_key_id == key_id || &live.record.peer_key_id == key_id;
            if involved && live.record.state != SessionState::Terminated {
                live.wipe(SessionState::Terminated);
                true
            } else {
                false
            }
        }))
        .await
        .into_iter()
        .filter(|t| *t)
        .count();

        if terminated > 0 {
            info!("🗑️  Terminated {} sessions using key {}", terminated, key_id);
        }
        terminated
    }

    /// Expire lapsed sessions and drop finished ones from the table
    ///
    /// Returns how many sessions expired in this pass.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let sessions: Vec<_> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect();

        let results = join_all(sessions.into_iter().map(|(id, session)| async move {
            let mut live = session.lock().await;
            let mut expired = false;
            if matches!(
                live.record.state,
                SessionState::Active | SessionState::Refreshing
            ) && now >= live.record.expires_at
            {
                live.wipe(SessionState::Expired);
                expired = true;
            }
            let finished = matches!(
                live.record.state,
                SessionState::Expired | SessionState::Terminated
            );
            (id, expired, finished)
        }))
        .await;

        let expired = results.iter().filter(|(_, expired, _)| *expired).count();
        let finished: Vec<_> = results
            .into_iter()
            .filter(|(_, _, finished)| *finished)
            .map(|(id, _, _)| id)
            .collect();
        if !finished.is_empty() {
            let mut table = self.sessions.write().await;
            for id in &finished {
                table.remove(id);
            }
            debug!(
                "Session sweep: {} expired, {} removed",
                expired,
                finished.len()
            );
        }
        expired
    }

    /// Key-free snapshot
    pub async fn get(&self, session_id: &str) -> Option<SessionRecord> {
        let session = self.sessions.read().await.get(session_id).cloned()?;
        let live = session.lock().await;
        Some(live.record.clone())
    }

    pub async fn active_count(&self) -> usize {
        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        let mut count = 0;
        for session in sessions {
            if session.lock().await.record.state == SessionState::Active {
                count += 1;
            }
        }
        count
    }

    async fn session(&self, session_id: &str) -> EngineResult<Arc<Mutex<LiveSession>>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| EngineError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }
}
