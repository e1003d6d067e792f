//! Access policy for administration operations.
//!
//! The transport layer enforces this table; the engine only describes it.

use crate::models::Role;

const ADMIN_OR_MANAGER: &[Role] = &[Role::Admin, Role::Manager];
const ADMIN_ONLY: &[Role] = &[Role::Admin];
const STAFF: &[Role] = &[Role::Admin, Role::Manager, Role::Client, Role::Service, Role::Hr];

/// Privileged operations exposed by the authorization model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminOperation {
    RegisterPrincipal,
    RegisterService,
    ListServices,
    ApproveScopeById,
    ApproveScope,
    ListScopes,
    ApprovedScopes,
    ScopeStatus,
    AssignRole,
    RevokeRole,
    ListPrincipals,
}

impl AdminOperation {
    pub const ALL: [AdminOperation; 11] = [
        AdminOperation::RegisterPrincipal,
        AdminOperation::RegisterService,
        AdminOperation::ListServices,
        AdminOperation::ApproveScopeById,
        AdminOperation::ApproveScope,
        AdminOperation::ListScopes,
        AdminOperation::ApprovedScopes,
        AdminOperation::ScopeStatus,
        AdminOperation::AssignRole,
        AdminOperation::RevokeRole,
        AdminOperation::ListPrincipals,
    ];

    /// Roles allowed to invoke this operation.
    pub fn allowed_roles(&self) -> &'static [Role] {
        match self {
            AdminOperation::RegisterPrincipal
            | AdminOperation::ListServices
            | AdminOperation::ApproveScopeById
            | AdminOperation::ApproveScope
            | AdminOperation::ListScopes
            | AdminOperation::ApprovedScopes
            | AdminOperation::RevokeRole => ADMIN_OR_MANAGER,
            AdminOperation::AssignRole => ADMIN_ONLY,
            AdminOperation::RegisterService
            | AdminOperation::ScopeStatus
            | AdminOperation::ListPrincipals => STAFF,
        }
    }

    pub fn is_allowed_for(&self, roles: &[Role]) -> bool {
        roles.iter().any(|role| self.allowed_roles().contains(role))
    }
}
