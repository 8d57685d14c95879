// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod admin;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod handshake;
pub mod keys;
pub mod session;
pub mod signer;
pub mod storage;
pub mod telemetry;
pub mod version;

// Re-export the main entry points
pub use admin::{AdminOperation, AdminOutcome, AdminService, AuthorizationToken};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{MaintenanceReport, SecureSessionEngine};
pub use error::{EngineError, EngineResult, ErrorKind, ErrorReport};
pub use handshake::{
    AuthenticationProtocol, Challenge, CipherSuite, HandshakeOutcome, HandshakeState, Hello,
    Response,
};
pub use keys::{
    KeyHierarchyManager, KeyId, KeyRecord, KeyState, OwnerKind, RevocationEntry,
    RevocationRegistry, RotationScheduler, RotationTransition, TransitionKind,
};
pub use session::{Packet, SessionManager, SessionRecord, SessionState};
pub use signer::{KeySlot, KeySource, SecureSigner, SignerKeySource, SoftwareToken};
pub use storage::{JsonFileStateStore, MemoryStateStore, PersistedState, StateStore};
