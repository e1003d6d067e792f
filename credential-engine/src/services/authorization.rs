//! Role and scope authorization model.
//!
//! Principals hold a set of roles from the closed [`Role`] enumeration.
//! Services request scopes which an administrator approves; approval is
//! monotone and every write here is idempotent.

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;
use validator::Validate;

use super::cache::CredentialCache;
use super::directory::Directory;
use super::error::{EngineError, EngineResult};
use crate::dtos::{RegisterPrincipalRequest, ServiceRegistrationRequest};
use crate::models::service::validate_service_name;
use crate::models::{
    Principal, PrincipalSummary, RegisteredService, Role, RoleRevocation, ScopeRequest,
    ScopeStatus, ScopeVerb, ServiceScope,
};
use crate::utils::{Password, PasswordHashString, PasswordHasher};

/// Verified in place of a stored hash when the username is unknown.
const PLACEHOLDER_PASSWORD: &str = "placeholder-credential";

pub struct AuthorizationModel {
    directory: Arc<dyn Directory>,
    hasher: Arc<dyn PasswordHasher>,
    cache: Option<Arc<CredentialCache>>,
    min_password_length: usize,
    placeholder_hash: OnceCell<PasswordHashString>,
}

impl AuthorizationModel {
    pub fn new(
        directory: Arc<dyn Directory>,
        hasher: Arc<dyn PasswordHasher>,
        min_password_length: usize,
    ) -> Self {
        Self {
            directory,
            hasher,
            cache: None,
            min_password_length,
            placeholder_hash: OnceCell::new(),
        }
    }

    /// Evict cached tokens of principals whose roles change.
    pub fn with_cache(mut self, cache: Arc<CredentialCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    // ---------------------------------------------------------------------
    // Principals
    // ---------------------------------------------------------------------

    pub async fn register_principal(
        &self,
        req: &RegisterPrincipalRequest,
    ) -> EngineResult<PrincipalSummary> {
        req.validate()?;
        let password = Password::new(req.password.clone());
        if password.len() < self.min_password_length {
            return Err(EngineError::InvalidRequest(format!(
                "Password must be at least {} characters",
                self.min_password_length
            )));
        }

        let role = req.role.unwrap_or(Role::User);
        let hash = self.hash(password).await?;
        let principal = Principal::new(req.username.clone(), req.email.clone(), hash.into_string())
            .with_role(role);

        let inserted = self
            .directory
            .insert_principal(&principal)
            .await
            .map_err(EngineError::store)?;
        if !inserted {
            tracing::debug!(principal = %req.username, "Registration rejected, name taken");
            return Err(EngineError::Conflict(format!(
                "Principal '{}' already exists",
                req.username
            )));
        }

        tracing::info!(principal = %principal.username, role = %role, "Principal registered");
        Ok(principal.summary())
    }

    /// Create the ADMIN principal if it does not exist. Returns whether it was created.
    pub async fn bootstrap_admin(
        &self,
        username: &str,
        password: &Password,
        email: Option<&str>,
    ) -> EngineResult<bool> {
        if self.find_principal_by_name(username).await?.is_some() {
            tracing::debug!(principal = %username, "Admin principal already present");
            return Ok(false);
        }

        let req = RegisterPrincipalRequest {
            username: username.to_string(),
            password: password.as_str().to_string(),
            email: email.map(str::to_string),
            role: Some(Role::Admin),
        };

        match self.register_principal(&req).await {
            Ok(_) => Ok(true),
            // lost a race with another instance seeding the same admin
            Err(EngineError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Check a username/password pair.
    ///
    /// Unknown user and wrong password both yield `InvalidCredentials`.
    /// An unknown user still pays for one verification against a placeholder
    /// hash, so timing does not reveal which usernames exist.
    pub async fn verify_credentials(&self, username: &str, password: &str) -> EngineResult<Principal> {
        let principal = self.find_principal_by_name(username).await?;
        let hash = match &principal {
            Some(principal) => PasswordHashString::new(principal.password_hash.clone()),
            None => self.placeholder_hash().await?,
        };

        let hasher = Arc::clone(&self.hasher);
        let password = Password::new(password);
        let valid = tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| EngineError::Internal(format!("Password verification task failed: {}", e)))?;

        match principal {
            Some(principal) if valid => Ok(principal),
            _ => {
                tracing::debug!("Credential check failed");
                Err(EngineError::InvalidCredentials)
            }
        }
    }

    async fn placeholder_hash(&self) -> EngineResult<PasswordHashString> {
        self.placeholder_hash
            .get_or_try_init(|| self.hash(Password::new(PLACEHOLDER_PASSWORD)))
            .await
            .cloned()
    }

    pub async fn find_principal_by_name(&self, username: &str) -> EngineResult<Option<Principal>> {
        self.directory
            .find_principal_by_name(username)
            .await
            .map_err(EngineError::store)
    }

    /// Current `ROLE_*` authorities of a principal.
    pub async fn permissions_for(&self, username: &str) -> EngineResult<Vec<String>> {
        self.find_principal_by_name(username)
            .await?
            .map(|p| p.authorities())
            .ok_or(EngineError::PrincipalNotFound)
    }

    pub async fn list_principals(&self) -> EngineResult<Vec<PrincipalSummary>> {
        Ok(self
            .directory
            .list_principals()
            .await
            .map_err(EngineError::store)?
            .iter()
            .map(Principal::summary)
            .collect())
    }

    // ---------------------------------------------------------------------
    // Roles
    // ---------------------------------------------------------------------

    /// Grant `role`. Re-granting a held role is a no-op.
    pub async fn assign_role(&self, principal_id: Uuid, role: Role) -> EngineResult<BTreeSet<Role>> {
        self.directory
            .ensure_role(role)
            .await
            .map_err(EngineError::store)?;

        let roles = self
            .directory
            .grant_role(principal_id, role)
            .await
            .map_err(EngineError::store)?
            .ok_or(EngineError::PrincipalNotFound)?;

        self.evict_cached(principal_id).await?;
        tracing::info!(principal_id = %principal_id, role = %role, "Role assigned");
        Ok(roles)
    }

    pub async fn revoke_role(&self, principal_id: Uuid, role: Role) -> EngineResult<RoleRevocation> {
        let removed = self
            .directory
            .remove_role(principal_id, role)
            .await
            .map_err(EngineError::store)?
            .ok_or(EngineError::PrincipalNotFound)?;

        if !removed {
            tracing::debug!(principal_id = %principal_id, role = %role, "Role not held");
            return Ok(RoleRevocation::NotHeld);
        }

        self.evict_cached(principal_id).await?;
        tracing::info!(principal_id = %principal_id, role = %role, "Role revoked");
        Ok(RoleRevocation::Removed)
    }

    async fn evict_cached(&self, principal_id: Uuid) -> EngineResult<()> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };
        if let Some(principal) = self
            .directory
            .find_principal(principal_id)
            .await
            .map_err(EngineError::store)?
        {
            let evicted = cache.evict_principal(&principal.username);
            tracing::debug!(principal = %principal.username, evicted, "Cached tokens evicted after role change");
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Services and scopes
    // ---------------------------------------------------------------------

    /// Register a (service, scope) pair. Returns the existing request unchanged
    /// if the pair is already known.
    pub async fn register_service(&self, service_name: &str, scope: ScopeVerb) -> EngineResult<ScopeRequest> {
        let service_name = service_name.trim();
        validate_service_name(service_name).map_err(EngineError::InvalidRequest)?;

        let registration = self
            .directory
            .register_scope(service_name, scope)
            .await
            .map_err(EngineError::store)?;

        if registration.created {
            tracing::info!(service = %service_name, scope = %scope, "Scope requested");
        } else {
            tracing::debug!(service = %service_name, scope = %scope, "Scope already registered");
        }
        Ok(registration.request)
    }

    pub async fn register_service_request(
        &self,
        req: &ServiceRegistrationRequest,
    ) -> EngineResult<ScopeRequest> {
        req.validate()?;
        let scope = req.scope_verb()?;
        self.register_service(&req.service_name, scope).await
    }

    /// Approve a scope of a service. Approving twice is a no-op success.
    pub async fn approve_scope(&self, service_id: Uuid, scope: ScopeVerb) -> EngineResult<ScopeRequest> {
        self.require_service(service_id).await?;
        let request = self
            .directory
            .find_scope(service_id, scope)
            .await
            .map_err(EngineError::store)?
            .ok_or(EngineError::ScopeNotFound)?;
        self.approve_scope_by_id(request.scope_id).await
    }

    pub async fn approve_scope_by_id(&self, scope_id: Uuid) -> EngineResult<ScopeRequest> {
        let approved = self
            .directory
            .approve_scope(scope_id)
            .await
            .map_err(EngineError::store)?
            .ok_or(EngineError::ScopeNotFound)?;

        tracing::info!(scope_id = %scope_id, scope = %approved.scope, "Scope approved");
        Ok(approved)
    }

    /// Pending and never-requested scopes both report `PendingOrUnknown`.
    pub async fn scope_status(&self, service_id: Uuid, scope: ScopeVerb) -> EngineResult<ScopeStatus> {
        let service = self.require_service(service_id).await?;
        Ok(match service.scope(scope) {
            Some(request) if request.approved => ScopeStatus::Approved,
            _ => ScopeStatus::PendingOrUnknown,
        })
    }

    /// Whether `service_scope` is approved, looked up by service name.
    pub async fn is_scope_approved(&self, service_scope: &ServiceScope) -> EngineResult<bool> {
        Ok(self
            .directory
            .find_service_by_name(&service_scope.service)
            .await
            .map_err(EngineError::store)?
            .and_then(|service| service.scope(service_scope.verb).map(|s| s.approved))
            .unwrap_or(false))
    }

    pub async fn list_services(&self) -> EngineResult<Vec<RegisteredService>> {
        self.directory
            .list_services()
            .await
            .map_err(EngineError::store)
    }

    pub async fn list_scopes(&self, service_id: Uuid) -> EngineResult<Vec<ScopeRequest>> {
        Ok(self.require_service(service_id).await?.scopes)
    }

    pub async fn approved_scopes(&self, service_id: Uuid) -> EngineResult<Vec<ScopeVerb>> {
        Ok(self.require_service(service_id).await?.approved_scopes())
    }

    async fn require_service(&self, service_id: Uuid) -> EngineResult<RegisteredService> {
        self.directory
            .find_service(service_id)
            .await
            .map_err(EngineError::store)?
            .ok_or(EngineError::ServiceNotFound)
    }

    async fn hash(&self, password: Password) -> EngineResult<PasswordHashString> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| EngineError::Internal(format!("Password hashing task failed: {}", e)))?
            .map_err(|e| EngineError::Internal(e.to_string()))
    }
}
