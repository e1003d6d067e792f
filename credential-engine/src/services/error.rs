use service_core::error::CoreError;
use thiserror::Error;

/// Typed failures surfaced by the credential engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Principal not found")]
    PrincipalNotFound,

    #[error("Service not found")]
    ServiceNotFound,

    #[error("Scope not found")]
    ScopeNotFound,

    #[error("Refresh token not found")]
    RefreshTokenNotFound,

    #[error("Refresh token expired")]
    RefreshTokenExpired,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Store error: {0}")]
    Store(anyhow::Error),

    #[error(transparent)]
    Config(#[from] CoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::PrincipalNotFound
                | EngineError::ServiceNotFound
                | EngineError::ScopeNotFound
                | EngineError::RefreshTokenNotFound
        )
    }

    pub fn is_expired(&self) -> bool {
        matches!(
            self,
            EngineError::RefreshTokenExpired | EngineError::TokenExpired
        )
    }

    /// Conditions that should abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::KeyGeneration(_) | EngineError::Config(_))
    }

    pub(crate) fn store(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "Credential store failure");
        EngineError::Store(err)
    }
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(err: validator::ValidationErrors) -> Self {
        EngineError::InvalidRequest(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
