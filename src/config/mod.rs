// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Engine configuration
//!
//! Loaded from TOML (`[keys]`, `[handshake]`, `[session]`, `[maintenance]`
//! tables), optionally overridden from `SUBKEY_*` environment variables, and
//! checked with [`EngineConfig::validate`] before an engine is built.
//!
//! Default lifetimes follow the provisioning policy: device sub-keys live one
//! year, router sub-keys six months, the master key never expires.

use anyhow::{anyhow, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{EngineError, EngineResult};
use crate::handshake::CipherSuite;

const DAY: u64 = 24 * 60 * 60;

/// Ceiling for every duration setting (100 years)
pub const MAX_DURATION_SECONDS: u64 = 100 * 365 * DAY;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyPolicyConfig {
    pub device_key_lifetime_seconds: u64,
    pub router_key_lifetime_seconds: u64,
    /// Dual-active window during which the old key still verifies
    pub rotation_grace_seconds: u64,
    /// Scheduled rotation starts this long before a sub-key expires
    pub rotation_lead_seconds: u64,
    /// Expired keys move to Archived after this long
    pub archive_after_seconds: u64,
}

impl Default for KeyPolicyConfig {
    fn default() -> Self {
        Self {
            device_key_lifetime_seconds: 365 * DAY,
            router_key_lifetime_seconds: 182 * DAY,
            rotation_grace_seconds: 7 * DAY,
            rotation_lead_seconds: 30 * DAY,
            archive_after_seconds: 30 * DAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    pub max_clock_skew_seconds: u64,
    /// Added to the skew tolerance to size nonce retention
    pub transport_delay_seconds: u64,
    pub handshake_timeout_seconds: u64,
    /// Local preference order used when selecting a suite
    pub cipher_suites: Vec<CipherSuite>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            max_clock_skew_seconds: 30,
            transport_delay_seconds: 10,
            handshake_timeout_seconds: 30,
            cipher_suites: vec![
                CipherSuite::Secp256k1XChaCha20Poly1305Sha256,
                CipherSuite::Secp256k1Aes256GcmSha256,
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub session_lifetime_seconds: u64,
    /// Hard cap on session age across refreshes
    pub max_session_age_seconds: u64,
    pub replay_window_size: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_lifetime_seconds: 60 * 60,
            max_session_age_seconds: DAY,
            replay_window_size: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub sweep_interval_seconds: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub keys: KeyPolicyConfig,
    pub handshake: HandshakeConfig,
    pub session: SessionConfig,
    pub maintenance: MaintenanceConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Defaults overridden by `SUBKEY_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply `SUBKEY_*` overrides on top of the current values
    pub fn apply_env(&mut self) {
        override_u64(
            "SUBKEY_DEVICE_KEY_LIFETIME_SECONDS",
            &mut self.keys.device_key_lifetime_seconds,
        );
        override_u64(
            "SUBKEY_ROUTER_KEY_LIFETIME_SECONDS",
            &mut self.keys.router_key_lifetime_seconds,
        );
        override_u64(
            "SUBKEY_ROTATION_GRACE_SECONDS",
            &mut self.keys.rotation_grace_seconds,
        );
        override_u64(
            "SUBKEY_MAX_CLOCK_SKEW_SECONDS",
            &mut self.handshake.max_clock_skew_seconds,
        );
        override_u64(
            "SUBKEY_HANDSHAKE_TIMEOUT_SECONDS",
            &mut self.handshake.handshake_timeout_seconds,
        );
        override_u64(
            "SUBKEY_SESSION_LIFETIME_SECONDS",
            &mut self.session.session_lifetime_seconds,
        );
        override_u64(
            "SUBKEY_REPLAY_WINDOW_SIZE",
            &mut self.session.replay_window_size,
        );
        override_u64(
            "SUBKEY_SWEEP_INTERVAL_SECONDS",
            &mut self.maintenance.sweep_interval_seconds,
        );
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> EngineResult<()> {
        let keys = &self.keys;
        let durations = [
            ("keys.device_key_lifetime_seconds", keys.device_key_lifetime_seconds),
            ("keys.router_key_lifetime_seconds", keys.router_key_lifetime_seconds),
            ("keys.rotation_grace_seconds", keys.rotation_grace_seconds),
            ("keys.rotation_lead_seconds", keys.rotation_lead_seconds),
            ("keys.archive_after_seconds", keys.archive_after_seconds),
            ("handshake.max_clock_skew_seconds", self.handshake.max_clock_skew_seconds),
            ("handshake.transport_delay_seconds", self.handshake.transport_delay_seconds),
            ("handshake.handshake_timeout_seconds", self.handshake.handshake_timeout_seconds),
            ("session.session_lifetime_seconds", self.session.session_lifetime_seconds),
            ("session.max_session_age_seconds", self.session.max_session_age_seconds),
            ("maintenance.sweep_interval_seconds", self.maintenance.sweep_interval_seconds),
        ];
        if let Some((name, value)) = durations
            .iter()
            .find(|(_, value)| *value > MAX_DURATION_SECONDS)
        {
            return Err(EngineError::Config(format!(
                "{} ({}s) exceeds the {}s ceiling",
                name, value, MAX_DURATION_SECONDS
            )));
        }
        if keys.device_key_lifetime_seconds == 0 || keys.router_key_lifetime_seconds == 0 {
            return Err(EngineError::Config(
                "sub-key lifetimes must be non-zero".to_string(),
            ));
        }
        if keys.router_key_lifetime_seconds >= keys.device_key_lifetime_seconds {
            return Err(EngineError::Config(format!(
                "router key lifetime ({}s) must be shorter than device key lifetime ({}s)",
                keys.router_key_lifetime_seconds, keys.device_key_lifetime_seconds
            )));
        }
        if keys.rotation_grace_seconds == 0
            || keys.rotation_grace_seconds >= keys.router_key_lifetime_seconds
        {
            return Err(EngineError::Config(format!(
                "rotation grace ({}s) must be non-zero and shorter than every sub-key lifetime",
                keys.rotation_grace_seconds
            )));
        }
        if self.handshake.max_clock_skew_seconds == 0 || self.handshake.handshake_timeout_seconds == 0
        {
            return Err(EngineError::Config(
                "clock skew tolerance and handshake timeout must be non-zero".to_string(),
            ));
        }
        if self.handshake.cipher_suites.is_empty() {
            return Err(EngineError::Config(
                "at least one cipher suite must be enabled".to_string(),
            ));
        }
        let session = &self.session;
        if session.session_lifetime_seconds == 0
            || session.session_lifetime_seconds > session.max_session_age_seconds
        {
            return Err(EngineError::Config(format!(
                "session lifetime ({}s) must be non-zero and at most the max session age ({}s)",
                session.session_lifetime_seconds, session.max_session_age_seconds
            )));
        }
        if session.replay_window_size == 0 || session.replay_window_size > 4096 {
            return Err(EngineError::Config(format!(
                "replay window size must be within 1..=4096, got {}",
                session.replay_window_size
            )));
        }
        if self.maintenance.sweep_interval_seconds == 0 {
            return Err(EngineError::Config(
                "sweep interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn device_key_lifetime(&self) -> Duration {
        seconds(self.keys.device_key_lifetime_seconds)
    }

    pub fn router_key_lifetime(&self) -> Duration {
        seconds(self.keys.router_key_lifetime_seconds)
    }

    pub fn rotation_grace(&self) -> Duration {
        seconds(self.keys.rotation_grace_seconds)
    }

    pub fn rotation_lead(&self) -> Duration {
        seconds(self.keys.rotation_lead_seconds)
    }

    pub fn archive_after(&self) -> Duration {
        seconds(self.keys.archive_after_seconds)
    }

    pub fn max_clock_skew(&self) -> Duration {
        seconds(self.handshake.max_clock_skew_seconds)
    }

    /// How long a seen nonce is remembered
    pub fn nonce_retention(&self) -> Duration {
        seconds(
            self.handshake
                .max_clock_skew_seconds
                .saturating_add(self.handshake.transport_delay_seconds),
        )
    }

    pub fn handshake_timeout(&self) -> Duration {
        seconds(self.handshake.handshake_timeout_seconds)
    }

    pub fn session_lifetime(&self) -> Duration {
        seconds(self.session.session_lifetime_seconds)
    }

    pub fn max_session_age(&self) -> Duration {
        seconds(self.session.max_session_age_seconds)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.maintenance.sweep_interval_seconds)
    }
}

/// Clamped to [`MAX_DURATION_SECONDS`] so unvalidated values cannot overflow
fn seconds(value: u64) -> Duration {
    let clamped = i64::try_from(value.min(MAX_DURATION_SECONDS)).unwrap_or(0);
    Duration::try_seconds(clamped).unwrap_or_else(Duration::zero)
}

fn override_u64(var: &str, target: &mut u64) {
    if let Ok(val) = std::env::var(var) {
        match val.trim().parse() {
            Ok(num) => *target = num,
            Err(_) => tracing::warn!("Ignoring {}={:?}: not an unsigned integer", var, val),
        }
    }
}
