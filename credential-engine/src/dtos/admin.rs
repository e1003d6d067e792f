use serde::Deserialize;
use validator::Validate;

use crate::models::{Role, ScopeVerb};
use crate::services::error::{EngineError, EngineResult};
use crate::models::service::validate_service_name;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterPrincipalRequest {
    #[validate(length(min = 3, max = 64, message = "Username must be 3-64 characters"))]
    pub username: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    #[validate(email(message = "Invalid email format"))]
    #[serde(default)]
    pub email: Option<String>,

    /// Initial role, USER when absent
    #[serde(default)]
    pub role: Option<Role>,
}

impl RegisterPrincipalRequest {
    pub fn new(username: &str, password: &str, role: Role) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            email: None,
            role: Some(role),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ServiceRegistrationRequest {
    #[validate(length(min = 1, max = 128, message = "Service name is required"))]
    pub service_name: String,

    #[validate(length(min = 1, message = "Scope is required"))]
    pub scope: String,
}

impl ServiceRegistrationRequest {
    pub fn new(service_name: &str, scope: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            scope: scope.to_string(),
        }
    }

    pub fn scope_verb(&self) -> EngineResult<ScopeVerb> {
        validate_service_name(self.service_name.trim()).map_err(EngineError::InvalidRequest)?;
        self.scope.parse().map_err(EngineError::InvalidRequest)
    }
}
