use serde::Serialize;

use super::role::Role;
use super::service::ServiceScope;
use crate::services::policy::AdminOperation;

/// Authenticated principal attached to an inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrincipalContext {
    pub username: String,
    /// Current `ROLE_*` authorities
    pub authorities: Vec<String>,
    /// Service scope embedded in the presented token, if any
    pub service_scope: Option<ServiceScope>,
}

impl PrincipalContext {
    pub fn roles(&self) -> Vec<Role> {
        self.authorities
            .iter()
            .filter_map(|a| Role::from_authority(a))
            .collect()
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles().contains(&role)
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        self.roles().iter().any(|r| roles.contains(r))
    }

    pub fn permits(&self, operation: AdminOperation) -> bool {
        self.has_any_role(operation.allowed_roles())
    }
}
