// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Revocation Registry
//!
//! Append-only record of revoked keys. Revocation is monotonic: once a key id
//! is in the registry it never validates again, whatever its lifecycle state
//! later becomes.
//!
//! Revoking a key does not tear down sessions already established with it;
//! callers run `SessionManager::terminate_for_key` for that.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

use super::{KeyId, KeyState, RevocationEntry, SharedKeyTable};
use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::storage::StateStore;

#[derive(Debug, Default)]
struct RevocationLog {
    by_id: HashMap<KeyId, RevocationEntry>,
    order: Vec<KeyId>,
}

pub struct RevocationRegistry {
    log: RwLock<RevocationLog>,
    keys: SharedKeyTable,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
}

impl RevocationRegistry {
    pub fn new(keys: SharedKeyTable, store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            log: RwLock::new(RevocationLog::default()),
            keys,
            store,
            clock,
        }
    }

    /// Revoke `key_id`
    ///
    /// Idempotent: revoking an already revoked key returns the original entry
    /// without writing anything.
    ///
    /// # Errors
    ///
    /// - `KeyNotFound` if the key was never issued
    /// - `Storage` if persisting the entry failed; the revocation still holds
    pub async fn revoke(&self, key_id: &KeyId, reason: &str) -> EngineResult<RevocationEntry> {
        if !self.keys.read().await.contains(key_id) {
            return Err(EngineError::KeyNotFound {
                key_id: key_id.clone(),
            });
        }

        let now = self.clock.now();
        let entry = {
            let mut log = self.log.write().await;
            if let Some(existing) = log.by_id.get(key_id) {
                return Ok(existing.clone());
            }
            let entry = RevocationEntry {
                key_id: key_id.clone(),
                reason: reason.to_string(),
                revoked_at: now,
            };
            log.by_id.insert(key_id.clone(), entry.clone());
            log.order.push(key_id.clone());
            entry
        };

        let updated = self.keys.write().await.set_state(key_id, KeyState::Revoked, now);
        info!("⛔ Key {} revoked: {}", key_id, reason);

        if let Err(e) = self.store.append_revocation(&entry).await {
            error!("Failed to persist revocation of {}: {}", key_id, e);
            return Err(e);
        }
        if let Some(record) = updated {
            if let Err(e) = self.store.save_key(&record).await {
                error!("Failed to persist revoked key {}: {}", key_id, e);
                return Err(e);
            }
        }

        Ok(entry)
    }

    pub async fn is_revoked(&self, key_id: &KeyId) -> bool {
        self.log.read().await.by_id.contains_key(key_id)
    }

    pub async fn entry(&self, key_id: &KeyId) -> Option<RevocationEntry> {
        self.log.read().await.by_id.get(key_id).cloned()
    }

    /// All entries in revocation order
    pub async fn entries(&self) -> Vec<RevocationEntry> {
        let log = self.log.read().await;
        log.order
            .iter()
            .filter_map(|id| log.by_id.get(id).cloned())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.log.read().await.order.len()
    }

    /// Reload persisted entries, marking the matching key records Revoked
    pub async fn restore(&self, entries: Vec<RevocationEntry>) {
        let mut restored = Vec::with_capacity(entries.len());
        {
            let mut log = self.log.write().await;
            for entry in entries {
                if log.by_id.contains_key(&entry.key_id) {
                    continue;
                }
                log.order.push(entry.key_id.clone());
                restored.push((entry.key_id.clone(), entry.revoked_at));
                log.by_id.insert(entry.key_id.clone(), entry);
            }
        }

        let mut keys = self.keys.write().await;
        for (key_id, revoked_at) in &restored {
            keys.set_state(key_id, KeyState::Revoked, *revoked_at);
        }
        info!("Restored {} revocation entries", restored.len());
    }
}
