//! Services layer for the credential engine.
//!
//! Key management, token issuance and validation, the access token cache,
//! refresh persistence and the role/scope authorization model.

pub mod authorization;
pub mod cache;
mod database;
pub mod directory;
pub mod error;
pub mod gate;
pub mod jwt;
pub mod keys;
pub mod policy;
pub mod redis;
pub mod refresh_store;
pub mod session;

pub use authorization::AuthorizationModel;
pub use cache::{CacheKey, CachedToken, CredentialCache};
pub use database::PgDirectory;
pub use directory::{Directory, InMemoryDirectory, ScopeRegistration};
pub use error::{EngineError, EngineResult};
pub use gate::AuthenticationGate;
pub use jwt::{AccessTokenClaims, IssuedToken, TokenIssuer};
pub use keys::{Jwk, JwkSet, KeyManager, KeySource};
pub use policy::AdminOperation;
pub use redis::RedisRefreshStore;
pub use refresh_store::{InMemoryRefreshStore, RefreshStore, StoreWrite};
pub use session::{SessionManager, SessionSettings};
