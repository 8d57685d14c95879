// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Version information for the sub-key network engine

/// Full version string with feature description
pub const VERSION: &str = "v0.3.0-key-rotation-2025-10-13";

/// Semantic version number
pub const VERSION_NUMBER: &str = "0.3.0";

/// Major version number
pub const VERSION_MAJOR: u32 = 0;

/// Minor version number
pub const VERSION_MINOR: u32 = 3;

/// Patch version number
pub const VERSION_PATCH: u32 = 0;

/// Build date
pub const BUILD_DATE: &str = "2025-10-13";

/// Supported features in this version
pub const FEATURES: &[&str] = &[
    "master-signed-subkeys",
    "hardware-signer-slots",
    "revocation-registry",
    "scheduled-rotation",
    "forced-rotation",
    "mutual-authentication",
    "ecdh-key-exchange",
    "xchacha20-poly1305",
    "aes-256-gcm",
    "session-ratchet",
    "replay-protection",
    "perfect-forward-secrecy",
    "master-signed-admin-tokens",
];

/// Handshake and token wire versions understood by this build
pub const PROTOCOL_VERSIONS: &[&str] = &["subkey-network/handshake/v1", "subkey-network/admin-token/v1"];

/// Breaking changes from previous version
pub const BREAKING_CHANGES: &[&str] = &[
    "Packet headers carry key_epoch; peers must refresh in step",
    "Sub-key certificates exclude lifecycle state from the signed payload",
    "Admin operations require a Master-signed AuthorizationToken",
];

/// Get formatted version string for logging
pub fn get_version_string() -> String {
    format!("Sub-key Network Engine {} ({})", VERSION_NUMBER, BUILD_DATE)
}

/// Get full version info for status output
pub fn get_version_info() -> serde_json::Value {
    serde_json::json!({
        "version": VERSION_NUMBER,
        "build": VERSION,
        "date": BUILD_DATE,
        "features": FEATURES,
        "protocols": PROTOCOL_VERSIONS,
        "breaking_changes": BREAKING_CHANGES,
    })
}
