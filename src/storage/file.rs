// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! JSON snapshot file store
//!
//! Every write rewrites the whole snapshot through a temporary file and an
//! atomic rename. Suitable for a single engine per file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{PersistedState, StateStore};
use crate::error::{EngineError, EngineResult};
use crate::keys::{KeyRecord, RevocationEntry, RotationTransition};

pub struct JsonFileStateStore {
    path: PathBuf,
    cache: Mutex<Option<PersistedState>>,
}

impl JsonFileStateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> EngineResult<PersistedState> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                EngineError::Storage(format!("corrupt state file {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersistedState::default()),
            Err(e) => Err(EngineError::Storage(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn write_file(&self, state: &PersistedState) -> EngineResult<()> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| EngineError::Storage(format!("failed to encode state: {}", e)))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| EngineError::Storage(format!("failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            EngineError::Storage(format!("failed to replace {}: {}", self.path.display(), e))
        })
    }

    /// Apply `update` to the snapshot and write it back
    async fn update<F>(&self, update: F) -> EngineResult<()>
    where
        F: FnOnce(&mut PersistedState) + Send,
    {
        let mut cache = self.cache.lock().await;
        let mut state = match cache.take() {
            Some(state) => state,
            None => self.read_file().await?,
        };
        update(&mut state);
        let written = self.write_file(&state).await;
        *cache = Some(state);
        written
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn save_key(&self, record: &KeyRecord) -> EngineResult<()> {
        self.update(|state| match state.keys.iter_mut().find(|k| k.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => state.keys.push(record.clone()),
        })
        .await
    }

    async fn append_revocation(&self, entry: &RevocationEntry) -> EngineResult<()> {
        self.update(|state| {
            if !state.revocations.iter().any(|e| e.key_id == entry.key_id) {
                state.revocations.push(entry.clone());
            }
        })
        .await
    }

    async fn save_transition(&self, transition: &RotationTransition) -> EngineResult<()> {
        self.update(|state| {
            match state.transitions.iter_mut().find(|t| t.id == transition.id) {
                Some(existing) => *existing = transition.clone(),
                None => state.transitions.push(transition.clone()),
            }
        })
        .await
    }

    async fn load(&self) -> EngineResult<PersistedState> {
        let cache = self.cache.lock().await;
        match cache.as_ref() {
            Some(state) => Ok(state.clone()),
            None => self.read_file().await,
        }
    }
}
