// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Secure session engine
//!
//! Wires the key hierarchy, revocation registry, rotation scheduler,
//! handshake protocol and session manager around one key table, one state
//! store and one clock. Nothing here is process-global, so several engines
//! can run side by side (one per simulated device or router in tests).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use crate::admin::AdminService;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::handshake::{AuthenticationProtocol, NonceTracker};
use crate::keys::{
    KeyHierarchyManager, KeyRecord, KeyTable, OwnerKind, RevocationRegistry, RotationScheduler,
    RotationSweep, SubkeyRequest,
};
use crate::session::SessionManager;
use crate::signer::{KeySlot, SecureSigner, SignerKeySource};
use crate::storage::StateStore;

/// What one maintenance pass did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub at: Option<DateTime<Utc>>,
    pub rotation: RotationSweep,
    pub sessions_expired: usize,
    pub nonces_purged: usize,
}

impl MaintenanceReport {
    pub fn is_idle(&self) -> bool {
        self.rotation.is_empty() && self.sessions_expired == 0 && self.nonces_purged == 0
    }
}

pub struct SecureSessionEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn StateStore>,
    hierarchy: Arc<KeyHierarchyManager>,
    key_source: Arc<SignerKeySource>,
    rotation: Arc<RotationScheduler>,
    nonces: Arc<NonceTracker>,
    sessions: Arc<SessionManager>,
    admin: AdminService,
}

impl SecureSessionEngine {
    /// Build an engine around `master_signer`
    ///
    /// # Errors
    ///
    /// `Config` if the configuration does not validate.
    pub fn new(
        config: EngineConfig,
        master_signer: Arc<dyn SecureSigner>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> EngineResult<Self> {
        config.validate()?;

        let table = KeyTable::shared();
        let revocations = Arc::new(RevocationRegistry::new(
            table.clone(),
            store.clone(),
            clock.clone(),
        ));
        let hierarchy = Arc::new(KeyHierarchyManager::new(
            config.clone(),
            table,
            revocations,
            master_signer,
            store.clone(),
            clock.clone(),
        ));
        let key_source = Arc::new(SignerKeySource::new());
        let rotation = Arc::new(RotationScheduler::new(
            &config,
            hierarchy.clone(),
            key_source.clone(),
            clock.clone(),
        ));
        let nonces = Arc::new(NonceTracker::new(config.nonce_retention()));
        let sessions = Arc::new(SessionManager::new(&config, clock.clone()));
        let admin = AdminService::new(
            &config,
            hierarchy.clone(),
            rotation.clone(),
            sessions.clone(),
            clock.clone(),
        );

        info!(
            "🚀 Secure session engine v{} ready (sweep every {}s)",
            crate::version::VERSION_NUMBER,
            config.maintenance.sweep_interval_seconds
        );
        Ok(Self {
            config,
            clock,
            store,
            hierarchy,
            key_source,
            rotation,
            nonces,
            sessions,
            admin,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn hierarchy(&self) -> &Arc<KeyHierarchyManager> {
        &self.hierarchy
    }

    pub fn revocations(&self) -> &Arc<RevocationRegistry> {
        self.hierarchy.revocations()
    }

    pub fn rotation(&self) -> &Arc<RotationScheduler> {
        &self.rotation
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn admin(&self) -> &AdminService {
        &self.admin
    }

    pub async fn provision_master(&self, label: &str) -> EngineResult<KeyRecord> {
        self.hierarchy.provision_master(label).await
    }

    /// Make `signer` the signer for `label` (handshakes and rotation)
    pub async fn register_signer(&self, label: impl Into<String>, signer: Arc<dyn SecureSigner>) {
        self.key_source.register(label, signer).await;
    }

    /// Issue a sub-key for the key already held in `signer`'s default slot
    /// for `owner_kind`, and register the signer under `label`
    pub async fn enroll(
        &self,
        owner_kind: OwnerKind,
        label: &str,
        signer: Arc<dyn SecureSigner>,
    ) -> EngineResult<KeyRecord> {
        let slot = KeySlot::default_for(owner_kind);
        let public_key = signer.get_public_key(slot).await?;
        let algorithm = signer.algorithm(slot).await?;
        let record = self
            .hierarchy
            .issue(
                SubkeyRequest::new(owner_kind, label, public_key)
                    .with_slot(slot)
                    .with_algorithm(algorithm),
            )
            .await?;
        self.register_signer(label, signer).await;
        Ok(record)
    }

    /// Handshake driver for the party registered under `label`
    pub async fn authenticator(&self, label: &str) -> EngineResult<AuthenticationProtocol> {
        let signer =
            self.key_source
                .signer_for(label)
                .await
                .ok_or_else(|| EngineError::SignerUnavailable {
                    operation: "authenticate".to_string(),
                    reason: format!("no signer registered for {}", label),
                })?;
        Ok(AuthenticationProtocol::new(
            &self.config,
            label,
            signer,
            self.hierarchy.clone(),
            self.nonces.clone(),
            self.clock.clone(),
        ))
    }

    /// Reload key records, transitions and revocations from the store
    ///
    /// Returns the number of key records restored.
    pub async fn restore(&self) -> EngineResult<usize> {
        let state = self.store.load().await?;
        let count = state.keys.len();
        self.hierarchy.restore(state.keys, state.transitions).await;
        self.revocations().restore(state.revocations).await;
        Ok(count)
    }

    /// Run every periodic sweep once at `now`
    pub async fn run_maintenance(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let rotation = self.rotation.sweep(now).await;
        let sessions_expired = self.sessions.sweep_expired(now).await;
        let nonces_purged =
            self.nonces.purge(now).await + self.admin.purge_nonces(now).await;

        let report = MaintenanceReport {
            at: Some(now),
            rotation,
            sessions_expired,
            nonces_purged,
        };
        if report.is_idle() {
            debug!("Maintenance pass at {}: nothing to do", now.to_rfc3339());
        } else {
            info!(
                "🧹 Maintenance: {} rotations started, {} completed, {} keys expired, {} archived, {} sessions expired, {} nonces purged",
                report.rotation.started.len(),
                report.rotation.completed.len(),
                report.rotation.expired.len(),
                report.rotation.archived.len(),
                report.sessions_expired,
                report.nonces_purged
            );
        }
        report
    }

    /// Run [`Self::run_maintenance`] every `sweep_interval` until the
    /// handle is aborted
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(engine.config.sweep_interval());
            info!(
                "Starting maintenance loop every {}s",
                engine.config.maintenance.sweep_interval_seconds
            );
            loop {
                ticker.tick().await;
                engine.run_maintenance(engine.clock.now()).await;
            }
        })
    }
}
