// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Key Hierarchy
//!
//! Master key → device/router sub-keys, with revocation and rotation.
//!
//! - **Hierarchy**: issuance and chain-of-trust verification
//! - **Revocation**: append-only registry consulted at every chain link
//! - **Rotation**: scheduled and forced replacement with a dual-active window
//!
//! All three share one [`KeyTable`] behind a `tokio::sync::RwLock`; no
//! component holds it across a `SecureSigner` call.

pub mod hierarchy;
pub mod record;
pub mod revocation;
pub mod rotation;
pub mod table;

pub use hierarchy::{KeyHierarchyManager, SubkeyRequest};
pub use record::{
    KeyId, KeyRecord, KeyState, OwnerKind, RevocationEntry, RotationTransition, TransitionKind,
};
pub use revocation::RevocationRegistry;
pub use rotation::{RotationScheduler, RotationSweep};
pub use table::{KeyTable, SharedKeyTable};
