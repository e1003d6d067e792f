pub mod config;
pub mod dtos;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::{EngineConfig, JwtConfig, PasswordConfig};
use crate::services::{
    AuthenticationGate, AuthorizationModel, CredentialCache, Directory, InMemoryDirectory,
    InMemoryRefreshStore, JwkSet, KeyManager, KeySource, PgDirectory, RedisRefreshStore,
    RefreshStore, SessionManager, SessionSettings, TokenIssuer,
};
use crate::utils::{Argon2Hasher, PasswordHasher};
use service_core::error::CoreError;

pub use crate::services::{EngineError, EngineResult};

/// Fully wired credential lifecycle engine.
///
/// Components are shared behind `Arc` so a transport layer can hand them to
/// request handlers directly.
pub struct CredentialEngine {
    pub config: EngineConfig,
    pub keys: Arc<KeyManager>,
    pub issuer: Arc<TokenIssuer>,
    pub cache: Arc<CredentialCache>,
    pub refresh_store: Arc<dyn RefreshStore>,
    pub authz: Arc<AuthorizationModel>,
    pub sessions: Arc<SessionManager>,
    pub gate: Arc<AuthenticationGate>,
    sweeper: Option<JoinHandle<()>>,
}

impl CredentialEngine {
    /// Build with the backends selected by `config`.
    ///
    /// PostgreSQL is used for the directory when `database` is set and Redis
    /// for refresh records when `redis` is set; otherwise in memory.
    pub async fn build(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;

        let directory: Arc<dyn Directory> = match &config.database {
            Some(database) => {
                let pg = PgDirectory::connect(database).await.map_err(EngineError::store)?;
                pg.run_migrations().await.map_err(EngineError::store)?;
                Arc::new(pg)
            }
            None => Arc::new(InMemoryDirectory::new()),
        };

        let refresh_store: Arc<dyn RefreshStore> = match &config.redis {
            Some(redis) => Arc::new(
                RedisRefreshStore::new(redis)
                    .await
                    .map_err(EngineError::store)?,
            ),
            None => Arc::new(InMemoryRefreshStore::new()),
        };

        let keys = Arc::new(key_manager(&config.jwt).await?);
        let hasher = password_hasher(&config.password)?;

        Self::with_components(config, keys, hasher, directory, refresh_store).await
    }

    /// Build on in-memory backends regardless of `config.redis`/`config.database`.
    pub async fn in_memory(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let keys = Arc::new(key_manager(&config.jwt).await?);
        let hasher = password_hasher(&config.password)?;
        Self::with_components(
            config,
            keys,
            hasher,
            Arc::new(InMemoryDirectory::new()),
            Arc::new(InMemoryRefreshStore::new()),
        )
        .await
    }

    /// Wire the engine from explicit parts.
    ///
    /// The signing key is materialised before this returns so a bad key
    /// aborts startup instead of failing the first issuance.
    pub async fn with_components(
        config: EngineConfig,
        keys: Arc<KeyManager>,
        hasher: Arc<dyn PasswordHasher>,
        directory: Arc<dyn Directory>,
        refresh_store: Arc<dyn RefreshStore>,
    ) -> EngineResult<Self> {
        let init_keys = Arc::clone(&keys);
        tokio::task::spawn_blocking(move || init_keys.initialize())
            .await
            .map_err(|e| EngineError::KeyGeneration(format!("Key initialisation task failed: {}", e)))??;

        let issuer = Arc::new(TokenIssuer::new(
            Arc::clone(&keys),
            config.jwt.issuer.clone(),
            config.jwt.access_token_ttl_seconds,
        ));
        let cache = Arc::new(CredentialCache::new());
        let authz = Arc::new(
            AuthorizationModel::new(directory, hasher, config.password.min_length)
                .with_cache(Arc::clone(&cache)),
        );
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&issuer),
            Arc::clone(&cache),
            Arc::clone(&refresh_store),
            Arc::clone(&authz),
            SessionSettings::from(&config.session),
        ));
        let gate = Arc::new(AuthenticationGate::new(Arc::clone(&issuer), Arc::clone(&authz)));

        if let Some(admin) = &config.admin {
            let created = authz
                .bootstrap_admin(&admin.username, &admin.password, admin.email.as_deref())
                .await?;
            if created {
                tracing::info!(principal = %admin.username, "Seeded admin principal");
            }
        }

        let sweeper = match config.session.cache_sweep_interval_seconds {
            0 => None,
            secs => Some(cache.spawn_sweeper(Duration::from_secs(secs))),
        };

        tracing::info!(
            service = %config.service_name,
            environment = ?config.environment,
            key_id = %keys.key_id(),
            "Credential engine ready"
        );

        Ok(Self {
            config,
            keys,
            issuer,
            cache,
            refresh_store,
            authz,
            sessions,
            gate,
            sweeper,
        })
    }

    /// Public key document for verifiers.
    pub fn jwks(&self) -> EngineResult<JwkSet> {
        self.keys.jwks()
    }

    pub async fn health_check(&self) -> EngineResult<()> {
        self.authz
            .directory()
            .health_check()
            .await
            .map_err(EngineError::store)?;
        self.refresh_store
            .health_check()
            .await
            .map_err(EngineError::store)
    }
}

impl Drop for CredentialEngine {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

async fn key_manager(jwt: &JwtConfig) -> EngineResult<KeyManager> {
    let source = match &jwt.private_key_path {
        Some(path) => {
            let pem = tokio::fs::read_to_string(path).await.map_err(|e| {
                tracing::error!(path = %path, error = %e, "Failed to read signing key");
                EngineError::KeyGeneration(format!("Failed to read signing key {}: {}", path, e))
            })?;
            KeySource::Pem(pem)
        }
        None => KeySource::Generate { bits: jwt.key_bits },
    };
    Ok(KeyManager::new(jwt.key_id.clone(), source))
}

fn password_hasher(password: &PasswordConfig) -> EngineResult<Arc<dyn PasswordHasher>> {
    let hasher = Argon2Hasher::new(password.memory_kib, password.iterations, password.parallelism)
        .map_err(|e| CoreError::config(e.to_string()))?;
    Ok(Arc::new(hasher))
}
