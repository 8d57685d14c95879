// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Seen-nonce tracking
//!
//! A nonce is remembered for the retention period (clock skew tolerance plus
//! transport delay). Anything older is rejected by the timestamp check, so
//! forgetting it afterwards cannot reopen a replay.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::warn;

use super::messages::Nonce;
use crate::error::{EngineError, EngineResult};

pub struct NonceTracker {
    seen: Mutex<HashMap<Nonce, DateTime<Utc>>>,
    retention: Duration,
}

impl NonceTracker {
    pub fn new(retention: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Record `nonce`, failing with `NonceReplay` if it was seen within the
    /// retention period
    pub async fn check_and_record(&self, nonce: &Nonce, now: DateTime<Utc>) -> EngineResult<()> {
        let mut seen = self.seen.lock().await;
        if let Some(first_seen) = seen.get(nonce) {
            if now - *first_seen < self.retention {
                warn!("Replayed handshake nonce {}", nonce.prefix());
                return Err(EngineError::NonceReplay {
                    nonce_prefix: nonce.prefix(),
                });
            }
        }
        seen.insert(*nonce, now);
        Ok(())
    }

    /// Forget `nonce` now, for an attempt that timed out after recording it
    pub async fn release(&self, nonce: &Nonce) -> bool {
        self.seen.lock().await.remove(nonce).is_some()
    }

    /// Forget nonces older than the retention period
    pub async fn purge(&self, now: DateTime<Utc>) -> usize {
        let mut seen = self.seen.lock().await;
        let before = seen.len();
        seen.retain(|_, first_seen| now - *first_seen < self.retention);
        before - seen.len()
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }
}
