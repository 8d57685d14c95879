// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Building engines from configuration files

use std::io::Write;
use std::sync::Arc;

use subkey_network::crypto::SignatureAlgorithm;
use subkey_network::{
    CipherSuite, EngineConfig, EngineError, KeySlot, ManualClock, MemoryStateStore,
    SecureSessionEngine, SoftwareToken,
};
use tempfile::NamedTempFile;

fn master() -> Arc<SoftwareToken> {
    Arc::new(SoftwareToken::with_key(
        "master",
        KeySlot::SIGNATURE,
        SignatureAlgorithm::EcdsaSecp256k1,
    ))
}

#[tokio::test]
async fn test_engine_from_toml_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[keys]
router_key_lifetime_seconds = 2592000
rotation_grace_seconds = 86400

[handshake]
cipher_suites = ["Secp256k1Aes256GcmSha256"]

[session]
session_lifetime_seconds = 600
"#
    )
    .unwrap();

    let config = EngineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.handshake.cipher_suites, vec![CipherSuite::Secp256k1Aes256GcmSha256]);
    assert_eq!(config.keys.device_key_lifetime_seconds, 365 * 24 * 3600);

    let engine = SecureSessionEngine::new(
        config,
        master(),
        Arc::new(MemoryStateStore::new()),
        Arc::new(ManualClock::starting_now()),
    )
    .unwrap();
    assert_eq!(engine.config().session.session_lifetime_seconds, 600);
}

#[test]
fn test_inconsistent_file_is_rejected_at_startup() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[keys]
device_key_lifetime_seconds = 1000
router_key_lifetime_seconds = 2000
"#
    )
    .unwrap();

    let config = EngineConfig::from_file(file.path()).unwrap();
    let result = SecureSessionEngine::new(
        config,
        master(),
        Arc::new(MemoryStateStore::new()),
        Arc::new(ManualClock::starting_now()),
    );
    match result {
        Err(EngineError::Config(message)) => assert!(message.contains("router key lifetime")),
        Err(other) => panic!("expected a config error, got {}", other),
        Ok(_) => panic!("expected a config error"),
    }
}

#[test]
fn test_oversized_lifetime_is_rejected_at_startup() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[keys]
device_key_lifetime_seconds = 100000000000000000
"#
    )
    .unwrap();

    let config = EngineConfig::from_file(file.path()).unwrap();
    let result = SecureSessionEngine::new(
        config,
        master(),
        Arc::new(MemoryStateStore::new()),
        Arc::new(ManualClock::starting_now()),
    );
    match result {
        Err(EngineError::Config(message)) => assert!(message.contains("ceiling")),
        Err(other) => panic!("expected a config error, got {}", other),
        Ok(_) => panic!("expected a config error"),
    }
}
