// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Encrypted sessions between authenticated peers

pub mod manager;
pub mod packet;
pub mod replay;

pub use manager::{SessionManager, SessionRecord, SessionState};
pub use packet::{Packet, PacketHeader, HEADER_MAC_LEN};
pub use replay::{ReplayRejection, ReplayWindow};
