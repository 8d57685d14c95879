// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Rotation Scheduler
//!
//! Drives sub-key replacement. Per key:
//!
//! ```text
//! old:  Active ──begin──▶ Rotating ──complete (after window_end)──▶ Expired ──▶ Archived
//! new:            └──────▶ Active
//! ```
//!
//! A forced rotation skips the dual-active window: the old key goes straight
//! to Expired. Rotation never revokes.
//!
//! Replacement keys are generated through a [`KeySource`] with no shared lock
//! held, into the staging companion of the old key's slot. The old key's
//! slot is left alone, so an abandoned rotation leaves the old key Active
//! and still able to sign; the caller may retry.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{KeyHierarchyManager, KeyId, KeyState, RotationTransition, TransitionKind};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::signer::KeySource;

/// Outcome of one [`RotationScheduler::sweep`] pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RotationSweep {
    pub started: Vec<RotationTransition>,
    pub completed: Vec<String>,
    pub expired: Vec<KeyId>,
    pub archived: Vec<KeyId>,
    pub failed: Vec<(KeyId, ErrorKind)>,
}

impl RotationSweep {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty()
            && self.completed.is_empty()
            && self.expired.is_empty()
            && self.archived.is_empty()
            && self.failed.is_empty()
    }
}

/// Removes a key from the in-flight set when the rotation attempt ends
struct InFlight<'a> {
    set: &'a Mutex<HashSet<KeyId>>,
    key_id: KeyId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key_id);
    }
}

pub struct RotationScheduler {
    hierarchy: Arc<KeyHierarchyManager>,
    key_source: Arc<dyn KeySource>,
    clock: Arc<dyn Clock>,
    grace: Duration,
    lead: Duration,
    archive_after: Duration,
    in_flight: Mutex<HashSet<KeyId>>,
}

impl RotationScheduler {
    pub fn new(
        config: &EngineConfig,
        hierarchy: Arc<KeyHierarchyManager>,
        key_source: Arc<dyn KeySource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            hierarchy,
            key_source,
            clock,
            grace: config.rotation_grace(),
            lead: config.rotation_lead(),
            archive_after: config.archive_after(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Start a scheduled rotation of `key_id`
    ///
    /// # Errors
    ///
    /// - `NotActive` unless the key is Active
    /// - `RotationConflict` if a rotation of the key is already running
    /// - `SignerUnavailable` if no replacement could be generated
    pub async fn begin_rotation(&self, key_id: &KeyId) -> EngineResult<RotationTransition> {
        self.rotate(key_id, TransitionKind::Scheduled, self.clock.now())
            .await
    }

    /// Replace `key_id` immediately, with no dual-active window
    pub async fn force_rotation(&self, key_id: &KeyId) -> EngineResult<RotationTransition> {
        self.rotate(key_id, TransitionKind::Forced, self.clock.now())
            .await
    }

    /// Close a transition whose window has ended
    ///
    /// Marks the old key Expired. Completing an already completed transition
    /// returns it unchanged.
    ///
    /// # Errors
    ///
    /// - `TransitionNotFound` for an unknown id
    /// - `RotationWindowOpen` before `window_end`
    pub async fn complete_rotation(&self, transition_id: &str) -> EngineResult<RotationTransition> {
        self.complete_at(transition_id, self.clock.now()).await
    }

    async fn complete_at(
        &self,
        transition_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<RotationTransition> {
        let (transition, old) = {
            let mut table = self.hierarchy.table().write().await;
            let transition = table.transition_mut(transition_id).ok_or_else(|| {
                EngineError::TransitionNotFound {
                    transition_id: transition_id.to_string(),
                }
            })?;
            if transition.is_completed() {
                return Ok(transition.clone());
            }
            if now < transition.window_end {
                return Err(EngineError::RotationWindowOpen {
                    transition_id: transition_id.to_string(),
                    window_end: transition.window_end,
                });
            }
            transition.completed_at = Some(now);
            let transition = transition.clone();

            let old = match table.get(&transition.old_key_id).map(|r| r.state) {
                Some(KeyState::Rotating) => {
                    table.set_state(&transition.old_key_id, KeyState::Expired, now)
                }
                _ => None,
            };
            (transition, old)
        };

        info!(
            "🔄 Rotation {} completed, key {} expired",
            transition.id, transition.old_key_id
        );
        self.hierarchy.persist_transition(&transition).await?;
        if let Some(old) = old {
            self.hierarchy.persist_key(&old).await?;
        }
        Ok(transition)
    }

    async fn rotate(
        &self,
        key_id: &KeyId,
        kind: TransitionKind,
        now: DateTime<Utc>,
    ) -> EngineResult<RotationTransition> {
        let old = self
            .hierarchy
            .lookup(key_id)
            .await
            .ok_or_else(|| EngineError::KeyNotFound {
                key_id: key_id.clone(),
            })?;
        if old.is_master() {
            return Err(EngineError::ChainOfTrust {
                key_id: key_id.clone(),
                reason: "the master key never rotates".to_string(),
            });
        }
        if old.state != KeyState::Active {
            return Err(EngineError::NotActive {
                key_id: key_id.clone(),
                state: old.state,
            });
        }
        if self.hierarchy.revocations().is_revoked(key_id).await {
            return Err(EngineError::NotActive {
                key_id: key_id.clone(),
                state: KeyState::Revoked,
            });
        }

        // the staging slot may still hold a predecessor inside its window
        if self.predecessor_window_open(key_id, now).await {
            return Err(EngineError::RotationConflict {
                key_id: key_id.clone(),
            });
        }

        let _guard = self.claim(key_id)?;

        let staging = old.slot.staging();
        let public_key = match self.key_source.fresh_public_key(&old, staging).await {
            Ok(public_key) => public_key,
            Err(e) => {
                warn!("Rotation of {} aborted, key stays active: {}", key_id, e);
                return Err(e);
            }
        };
        let replacement = match self
            .hierarchy
            .certify_replacement(&old, public_key, staging, now)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    "Rotation of {} aborted during certification, key in slot {} unused: {}",
                    key_id, staging, e
                );
                return Err(e);
            }
        };

        let (window_end, completed_at) = match kind {
            TransitionKind::Scheduled => (now + self.grace, None),
            TransitionKind::Forced => (now + Duration::milliseconds(1), Some(now)),
        };
        let transition = RotationTransition {
            id: Uuid::new_v4().to_string(),
            old_key_id: key_id.clone(),
            new_key_id: replacement.id.clone(),
            window_start: now,
            window_end,
            kind,
            completed_at,
        };

        let retired = self
            .hierarchy
            .commit_replacement(replacement.clone(), transition.clone())
            .await?;

        info!(
            "🔄 {:?} rotation {} for {}: {} -> {} (window ends {})",
            kind,
            transition.id,
            replacement.label,
            key_id,
            replacement.id,
            window_end.to_rfc3339()
        );

        self.hierarchy.persist_key(&replacement).await?;
        self.hierarchy.persist_key(&retired).await?;
        self.hierarchy.persist_transition(&transition).await?;
        Ok(transition)
    }

    /// Whether `key_id` replaced a key that is still inside its window
    async fn predecessor_window_open(&self, key_id: &KeyId, now: DateTime<Utc>) -> bool {
        let table = self.hierarchy.table().read().await;
        let open = table
            .transitions()
            .any(|t| t.new_key_id == *key_id && !t.is_completed() && now < t.window_end);
        open
    }

    fn claim(&self, key_id: &KeyId) -> EngineResult<InFlight<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(key_id.clone()) {
            return Err(EngineError::RotationConflict {
                key_id: key_id.clone(),
            });
        }
        Ok(InFlight {
            set: &self.in_flight,
            key_id: key_id.clone(),
        })
    }

    /// Run all time-driven rotation work due at `now`
    ///
    /// In order: complete closed windows, expire lapsed sub-keys, archive
    /// long-expired keys, then begin rotations for keys within the lead time
    /// of their expiry. Failures are collected, not propagated.
    pub async fn sweep(&self, now: DateTime<Utc>) -> RotationSweep {
        let mut report = RotationSweep::default();

        let (due_transitions, records) = {
            let table = self.hierarchy.table().read().await;
            let due: Vec<String> = table
                .transitions()
                .filter(|t| !t.is_completed() && now >= t.window_end)
                .map(|t| t.id.clone())
                .collect();
            (due, table.records().cloned().collect::<Vec<_>>())
        };

        for transition_id in due_transitions {
            match self.complete_at(&transition_id, now).await {
                Ok(_) => report.completed.push(transition_id),
                Err(e) => {
                    warn!("Failed to complete rotation {}: {}", transition_id, e);
                }
            }
        }

        let mut to_rotate = Vec::new();
        for record in records.iter().filter(|r| !r.is_master()) {
            match record.state {
                KeyState::Active if record.is_expired_at(now) => {
                    if let Some(expired) = self.set_state(&record.id, KeyState::Expired, now).await {
                        warn!("Key {} for {} expired without rotation", expired.id, expired.label);
                        report.expired.push(expired.id);
                    }
                }
                KeyState::Active => {
                    let due = record
                        .expires_at
                        .map_or(false, |expires_at| now >= expires_at - self.lead);
                    if due {
                        to_rotate.push(record.id.clone());
                    }
                }
                KeyState::Expired if now >= record.updated_at + self.archive_after => {
                    if let Some(archived) = self.set_state(&record.id, KeyState::Archived, now).await
                    {
                        debug!("Key {} archived", archived.id);
                        report.archived.push(archived.id);
                    }
                }
                _ => {}
            }
        }

        for key_id in to_rotate {
            match self.rotate(&key_id, TransitionKind::Scheduled, now).await {
                Ok(transition) => report.started.push(transition),
                Err(e) => {
                    warn!("Scheduled rotation of {} failed: {}", key_id, e);
                    report.failed.push((key_id, e.kind()));
                }
            }
        }

        if !report.is_empty() {
            info!(
                "Rotation sweep: {} started, {} completed, {} expired, {} archived, {} failed",
                report.started.len(),
                report.completed.len(),
                report.expired.len(),
                report.archived.len(),
                report.failed.len()
            );
        }
        report
    }

    async fn set_state(
        &self,
        key_id: &KeyId,
        state: KeyState,
        at: DateTime<Utc>,
    ) -> Option<super::KeyRecord> {
        let updated = self
            .hierarchy
            .table()
            .write()
            .await
            .set_state(key_id, state, at)?;
        // persistence failure is already logged; the sweep carries on
        let _ = self.hierarchy.persist_key(&updated).await;
        Some(updated)
    }
}
