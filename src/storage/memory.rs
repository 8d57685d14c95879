// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::{PersistedState, StateStore};
use crate::error::{EngineError, EngineResult};
use crate::keys::{KeyRecord, RevocationEntry, RotationTransition};

/// In-memory [`StateStore`] with write-failure injection
#[derive(Default)]
pub struct MemoryStateStore {
    state: RwLock<PersistedState>,
    fail_writes: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: RwLock::new(state),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail with `Storage`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> EngineResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EngineError::Storage(
                "memory store rejecting writes".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save_key(&self, record: &KeyRecord) -> EngineResult<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        match state.keys.iter_mut().find(|k| k.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => state.keys.push(record.clone()),
        }
        Ok(())
    }

    async fn append_revocation(&self, entry: &RevocationEntry) -> EngineResult<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        if !state.revocations.iter().any(|e| e.key_id == entry.key_id) {
            state.revocations.push(entry.clone());
        }
        Ok(())
    }

    async fn save_transition(&self, transition: &RotationTransition) -> EngineResult<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        match state.transitions.iter_mut().find(|t| t.id == transition.id) {
            Some(existing) => *existing = transition.clone(),
            None => state.transitions.push(transition.clone()),
        }
        Ok(())
    }

    async fn load(&self) -> EngineResult<PersistedState> {
        Ok(self.state.read().await.clone())
    }
}
