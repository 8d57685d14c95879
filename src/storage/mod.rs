// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Persisted key state
//!
//! Key records, the revocation log and rotation transitions are written
//! through a [`StateStore`] after each in-memory commit. Session state is
//! never persisted.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::keys::{KeyRecord, RevocationEntry, RotationTransition};

pub use file::JsonFileStateStore;
pub use memory::MemoryStateStore;

/// Snapshot of everything a [`StateStore`] holds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub keys: Vec<KeyRecord>,
    /// In revocation order
    pub revocations: Vec<RevocationEntry>,
    pub transitions: Vec<RotationTransition>,
}

impl PersistedState {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.revocations.is_empty() && self.transitions.is_empty()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Insert or replace a key record
    async fn save_key(&self, record: &KeyRecord) -> EngineResult<()>;

    async fn append_revocation(&self, entry: &RevocationEntry) -> EngineResult<()>;

    /// Insert or replace a transition
    async fn save_transition(&self, transition: &RotationTransition) -> EngineResult<()>;

    async fn load(&self) -> EngineResult<PersistedState>;
}
