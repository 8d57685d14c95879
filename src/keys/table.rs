// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Authoritative key table shared by the hierarchy, revocation and rotation
//! components

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{KeyId, KeyRecord, KeyState, RotationTransition};

pub type SharedKeyTable = Arc<RwLock<KeyTable>>;

#[derive(Debug, Default)]
pub struct KeyTable {
    records: HashMap<KeyId, KeyRecord>,
    /// label -> key that currently signs for it
    current: HashMap<String, KeyId>,
    transitions: HashMap<String, RotationTransition>,
    master: Option<KeyId>,
}

impl KeyTable {
    pub fn shared() -> SharedKeyTable {
        Arc::new(RwLock::new(Self::default()))
    }

    pub fn get(&self, key_id: &KeyId) -> Option<&KeyRecord> {
        self.records.get(key_id)
    }

    pub fn contains(&self, key_id: &KeyId) -> bool {
        self.records.contains_key(key_id)
    }

    pub fn master(&self) -> Option<&KeyRecord> {
        self.master.as_ref().and_then(|id| self.records.get(id))
    }

    pub fn current(&self, label: &str) -> Option<&KeyRecord> {
        self.current.get(label).and_then(|id| self.records.get(id))
    }

    pub fn records(&self) -> impl Iterator<Item = &KeyRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert a record, making it the current key for its label if Active
    pub fn insert(&mut self, record: KeyRecord) {
        if record.is_master() {
            self.master = Some(record.id.clone());
        }
        if record.state == KeyState::Active {
            self.current.insert(record.label.clone(), record.id.clone());
        }
        self.records.insert(record.id.clone(), record);
    }

    /// Move a key to `state`
    ///
    /// Revoked and Archived are terminal. Returns the updated record, or
    /// `None` if the key is unknown or already terminal.
    pub fn set_state(
        &mut self,
        key_id: &KeyId,
        state: KeyState,
        at: DateTime<Utc>,
    ) -> Option<KeyRecord> {
        let record = self.records.get_mut(key_id)?;
        if matches!(record.state, KeyState::Revoked | KeyState::Archived) {
            return None;
        }
        record.state = state;
        record.updated_at = at;
        let updated = record.clone();

        if state != KeyState::Active && self.current.get(&updated.label) == Some(key_id) {
            self.current.remove(&updated.label);
        }
        Some(updated)
    }

    pub fn transition(&self, transition_id: &str) -> Option<&RotationTransition> {
        self.transitions.get(transition_id)
    }

    pub fn transition_mut(&mut self, transition_id: &str) -> Option<&mut RotationTransition> {
        self.transitions.get_mut(transition_id)
    }

    /// Most recent transition retiring `key_id`
    pub fn transition_for_old_key(&self, key_id: &KeyId) -> Option<&RotationTransition> {
        self.transitions
            .values()
            .filter(|t| &t.old_key_id == key_id)
            .max_by_key(|t| t.window_start)
    }

    pub fn transitions(&self) -> impl Iterator<Item = &RotationTransition> {
        self.transitions.values()
    }

    pub fn insert_transition(&mut self, transition: RotationTransition) {
        self.transitions.insert(transition.id.clone(), transition);
    }

    /// Replace the whole table contents
    pub fn reset(&mut self, records: Vec<KeyRecord>, transitions: Vec<RotationTransition>) {
        *self = Self::default();
        for record in records {
            self.insert(record);
        }
        for transition in transitions {
            self.insert_transition(transition);
        }
    }
}
