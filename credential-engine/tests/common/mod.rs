//! Shared setup for credential-engine integration tests.
//!
//! Builds an in-memory engine signing with a fixed RSA key loaded from a
//! temporary PEM file, so no test pays for key generation.

#![allow(dead_code)]

use credential_engine::{
    config::EngineConfig,
    dtos::{RegisterPrincipalRequest, TokenPair, TokenRequest},
    models::{PrincipalSummary, Role},
    CredentialEngine, EngineResult,
};
use std::io::Write;
use tempfile::NamedTempFile;

pub const SIGNING_KEY_PEM: &str = include_str!("../fixtures/signing_key.pem");
pub const FOREIGN_KEY_PEM: &str = include_str!("../fixtures/foreign_key.pem");
pub const PKCS1_KEY_PEM: &str = include_str!("../fixtures/pkcs1_key.pem");

pub const PASSWORD: &str = "securePassword";

pub fn write_key_file(pem: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create key file");
    file.write_all(pem.as_bytes()).expect("Failed to write key file");
    file
}

/// Engine config with cheap hashing and the sweeper off.
pub fn test_config(key_path: &str) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.jwt.private_key_path = Some(key_path.to_string());
    config.password.memory_kib = 1024;
    config.password.iterations = 1;
    config.password.parallelism = 1;
    config.session.cache_sweep_interval_seconds = 0;
    config
}

pub struct TestApp {
    pub engine: CredentialEngine,
    _key_file: NamedTempFile,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(configure: impl FnOnce(&mut EngineConfig)) -> Self {
        let key_file = write_key_file(SIGNING_KEY_PEM);
        let mut config = test_config(&key_file.path().to_string_lossy());
        configure(&mut config);

        let engine = CredentialEngine::in_memory(config)
            .await
            .expect("Failed to build engine");

        Self {
            engine,
            _key_file: key_file,
        }
    }

    pub async fn register(&self, username: &str, role: Role) -> PrincipalSummary {
        self.engine
            .authz
            .register_principal(&RegisterPrincipalRequest::new(username, PASSWORD, role))
            .await
            .expect("Failed to register principal")
    }

    pub async fn login(&self, username: &str, service: Option<&str>) -> EngineResult<TokenPair> {
        self.engine
            .sessions
            .get_token(&TokenRequest::new(username, PASSWORD, service))
            .await
    }
}
