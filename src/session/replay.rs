// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Sliding replay window over packet sequence numbers
//!
//! Holds accepted sequences in `(floor, highest]`, at most `capacity` wide.
//! A sequence is rejected if it is zero, at or below the floor, or already
//! accepted. Accepting a sequence more than `capacity` above the floor
//! slides the floor up and evicts everything at or below it.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayRejection {
    BelowFloor,
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct ReplayWindow {
    capacity: u64,
    floor: u64,
    accepted: BTreeSet<u64>,
}

impl ReplayWindow {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity: capacity.max(1),
            floor: 0,
            accepted: BTreeSet::new(),
        }
    }

    /// Whether `sequence` would be accepted
    pub fn check(&self, sequence: u64) -> Result<(), ReplayRejection> {
        if sequence <= self.floor {
            return Err(ReplayRejection::BelowFloor);
        }
        if self.accepted.contains(&sequence) {
            return Err(ReplayRejection::Duplicate);
        }
        Ok(())
    }

    /// Record an accepted sequence; call only after [`Self::check`] passed
    /// and the packet authenticated
    pub fn record(&mut self, sequence: u64) {
        self.accepted.insert(sequence);
        let highest = self.highest();
        if highest > self.floor + self.capacity {
            self.floor = highest - self.capacity;
            self.accepted = self.accepted.split_off(&(self.floor + 1));
        }
    }

    pub fn floor(&self) -> u64 {
        self.floor
    }

    pub fn highest(&self) -> u64 {
        self.accepted.iter().next_back().copied().unwrap_or(self.floor)
    }

    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}
