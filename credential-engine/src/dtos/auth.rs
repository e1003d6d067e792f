use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::ServiceScope;
use crate::services::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TokenRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    /// Optional `service::scope`, e.g. `invoice-generator::read`
    #[serde(default)]
    pub service_name: Option<String>,
}

impl TokenRequest {
    pub fn new(username: &str, password: &str, service_name: Option<&str>) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            service_name: service_name.map(str::to_string),
        }
    }

    /// Parsed service scope. Blank means none.
    pub fn service_scope(&self) -> EngineResult<Option<ServiceScope>> {
        match self.service_name.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => ServiceScope::parse(value)
                .map(Some)
                .map_err(EngineError::InvalidRequest),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,

    #[serde(default)]
    pub service: Option<String>,

    #[serde(default)]
    pub scope: Option<String>,
}

impl RefreshRequest {
    /// Embedded only when both parts are present.
    pub fn service_scope(&self) -> EngineResult<Option<ServiceScope>> {
        ServiceScope::from_parts(self.service.as_deref(), self.scope.as_deref())
            .map_err(EngineError::InvalidRequest)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LogoutRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

/// Access token plus the refresh identifier the transport delivers out of band.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub access_expires_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

impl TokenPair {
    pub fn new(
        access_token: String,
        access_expires_at: DateTime<Utc>,
        refresh_token: String,
        refresh_expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: (access_expires_at - Utc::now()).num_seconds().max(0),
            access_expires_at,
            refresh_token,
            refresh_expires_at,
        }
    }
}
