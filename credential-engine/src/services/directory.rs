//! Persistence abstraction for principals, roles and registered services.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Principal, RegisteredService, Role, ScopeRequest, ScopeVerb};

/// Result of registering a (service, scope) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeRegistration {
    pub request: ScopeRequest,
    /// `false` when the pair already existed and was returned unchanged
    pub created: bool,
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_principal(&self, principal_id: Uuid) -> Result<Option<Principal>, anyhow::Error>;

    async fn find_principal_by_name(
        &self,
        username: &str,
    ) -> Result<Option<Principal>, anyhow::Error>;

    /// Returns `false` when the username is already taken.
    async fn insert_principal(&self, principal: &Principal) -> Result<bool, anyhow::Error>;

    async fn list_principals(&self) -> Result<Vec<Principal>, anyhow::Error>;

    /// Create the global role row if missing.
    async fn ensure_role(&self, role: Role) -> Result<(), anyhow::Error>;

    /// Add `role` to the principal's set. `None` if the principal does not exist.
    async fn grant_role(
        &self,
        principal_id: Uuid,
        role: Role,
    ) -> Result<Option<BTreeSet<Role>>, anyhow::Error>;

    /// `None` if the principal does not exist, otherwise whether the role was held.
    async fn remove_role(&self, principal_id: Uuid, role: Role)
        -> Result<Option<bool>, anyhow::Error>;

    async fn list_services(&self) -> Result<Vec<RegisteredService>, anyhow::Error>;

    async fn find_service(&self, service_id: Uuid)
        -> Result<Option<RegisteredService>, anyhow::Error>;

    async fn find_service_by_name(
        &self,
        service_name: &str,
    ) -> Result<Option<RegisteredService>, anyhow::Error>;

    /// Create the service if new and the scope request if new, atomically.
    async fn register_scope(
        &self,
        service_name: &str,
        scope: ScopeVerb,
    ) -> Result<ScopeRegistration, anyhow::Error>;

    async fn find_scope(
        &self,
        service_id: Uuid,
        scope: ScopeVerb,
    ) -> Result<Option<ScopeRequest>, anyhow::Error>;

    /// Set `approved`. Never clears it. `None` if the scope does not exist.
    async fn approve_scope(&self, scope_id: Uuid) -> Result<Option<ScopeRequest>, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Default)]
struct DirectoryState {
    principals: HashMap<Uuid, Principal>,
    principal_names: HashMap<String, Uuid>,
    roles: BTreeSet<Role>,
    services: HashMap<Uuid, RegisteredService>,
    service_names: HashMap<String, Uuid>,
}

impl DirectoryState {
    fn scope_mut(&mut self, scope_id: Uuid) -> Option<&mut ScopeRequest> {
        self.services
            .values_mut()
            .flat_map(|s| s.scopes.iter_mut())
            .find(|s| s.scope_id == scope_id)
    }
}

/// Directory held in process memory.
#[derive(Default)]
pub struct InMemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn roles(&self) -> BTreeSet<Role> {
        self.state.read().await.roles.clone()
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn find_principal(&self, principal_id: Uuid) -> Result<Option<Principal>, anyhow::Error> {
        Ok(self.state.read().await.principals.get(&principal_id).cloned())
    }

    async fn find_principal_by_name(
        &self,
        username: &str,
    ) -> Result<Option<Principal>, anyhow::Error> {
        let state = self.state.read().await;
        Ok(state
            .principal_names
            .get(username)
            .and_then(|id| state.principals.get(id))
            .cloned())
    }

    async fn insert_principal(&self, principal: &Principal) -> Result<bool, anyhow::Error> {
        let mut state = self.state.write().await;
        if state.principal_names.contains_key(&principal.username) {
            return Ok(false);
        }
        state.roles.extend(principal.roles.iter().copied());
        state
            .principal_names
            .insert(principal.username.clone(), principal.principal_id);
        state
            .principals
            .insert(principal.principal_id, principal.clone());
        Ok(true)
    }

    async fn list_principals(&self) -> Result<Vec<Principal>, anyhow::Error> {
        let mut principals: Vec<Principal> =
            self.state.read().await.principals.values().cloned().collect();
        principals.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(principals)
    }

    async fn ensure_role(&self, role: Role) -> Result<(), anyhow::Error> {
        self.state.write().await.roles.insert(role);
        Ok(())
    }

    async fn grant_role(
        &self,
        principal_id: Uuid,
        role: Role,
    ) -> Result<Option<BTreeSet<Role>>, anyhow::Error> {
        let mut state = self.state.write().await;
        state.roles.insert(role);
        Ok(state.principals.get_mut(&principal_id).map(|principal| {
            principal.roles.insert(role);
            principal.roles.clone()
        }))
    }

    async fn remove_role(
        &self,
        principal_id: Uuid,
        role: Role,
    ) -> Result<Option<bool>, anyhow::Error> {
        let mut state = self.state.write().await;
        Ok(state
            .principals
            .get_mut(&principal_id)
            .map(|principal| principal.roles.remove(&role)))
    }

    async fn list_services(&self) -> Result<Vec<RegisteredService>, anyhow::Error> {
        let mut services: Vec<RegisteredService> =
            self.state.read().await.services.values().cloned().collect();
        services.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        Ok(services)
    }

    async fn find_service(
        &self,
        service_id: Uuid,
    ) -> Result<Option<RegisteredService>, anyhow::Error> {
        Ok(self.state.read().await.services.get(&service_id).cloned())
    }

    async fn find_service_by_name(
        &self,
        service_name: &str,
    ) -> Result<Option<RegisteredService>, anyhow::Error> {
        let state = self.state.read().await;
        Ok(state
            .service_names
            .get(service_name)
            .and_then(|id| state.services.get(id))
            .cloned())
    }

    async fn register_scope(
        &self,
        service_name: &str,
        scope: ScopeVerb,
    ) -> Result<ScopeRegistration, anyhow::Error> {
        let mut state = self.state.write().await;

        let service_id = match state.service_names.get(service_name) {
            Some(id) => *id,
            None => {
                let service = RegisteredService::new(service_name.to_string());
                let id = service.service_id;
                state.service_names.insert(service_name.to_string(), id);
                state.services.insert(id, service);
                id
            }
        };

        let service = state
            .services
            .get_mut(&service_id)
            .ok_or_else(|| anyhow::anyhow!("Service index out of sync for {}", service_name))?;

        if let Some(existing) = service.scope(scope) {
            return Ok(ScopeRegistration {
                request: existing.clone(),
                created: false,
            });
        }

        let request = ScopeRequest::new(service_id, scope);
        service.scopes.push(request.clone());
        Ok(ScopeRegistration {
            request,
            created: true,
        })
    }

    async fn find_scope(
        &self,
        service_id: Uuid,
        scope: ScopeVerb,
    ) -> Result<Option<ScopeRequest>, anyhow::Error> {
        Ok(self
            .state
            .read()
            .await
            .services
            .get(&service_id)
            .and_then(|s| s.scope(scope))
            .cloned())
    }

    async fn approve_scope(&self, scope_id: Uuid) -> Result<Option<ScopeRequest>, anyhow::Error> {
        let mut state = self.state.write().await;
        Ok(state.scope_mut(scope_id).map(|scope| {
            scope.approve();
            scope.clone()
        }))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(name: &str) -> Principal {
        Principal::new(name.to_string(), None, "hash".to_string()).with_role(Role::User)
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_name() {
        let directory = InMemoryDirectory::new();
        assert!(directory.insert_principal(&principal("jane_doe")).await.unwrap());
        assert!(!directory.insert_principal(&principal("jane_doe")).await.unwrap());
        assert_eq!(directory.list_principals().await.unwrap().len(), 1);
        assert!(directory.roles().await.contains(&Role::User));
    }

    #[tokio::test]
    async fn test_grant_and_remove_role() {
        let directory = InMemoryDirectory::new();
        let jane = principal("jane_doe");
        directory.insert_principal(&jane).await.unwrap();

        let roles = directory.grant_role(jane.principal_id, Role::Manager).await.unwrap().unwrap();
        assert!(roles.contains(&Role::Manager));
        assert_eq!(directory.remove_role(jane.principal_id, Role::Manager).await.unwrap(), Some(true));
        assert_eq!(directory.remove_role(jane.principal_id, Role::Manager).await.unwrap(), Some(false));
        assert_eq!(directory.grant_role(Uuid::new_v4(), Role::Admin).await.unwrap(), None);
        assert_eq!(directory.remove_role(Uuid::new_v4(), Role::Admin).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_register_scope_is_idempotent() {
        let directory = InMemoryDirectory::new();
        let first = directory.register_scope("invoice-generator", ScopeVerb::Read).await.unwrap();
        let second = directory.register_scope("invoice-generator", ScopeVerb::Read).await.unwrap();
        let other = directory.register_scope("invoice-generator", ScopeVerb::Write).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.request, second.request);
        assert_eq!(other.request.service_id, first.request.service_id);

        let services = directory.list_services().await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].scopes.len(), 2);
    }

    #[tokio::test]
    async fn test_approve_scope_is_monotone() {
        let directory = InMemoryDirectory::new();
        let reg = directory.register_scope("billing", ScopeVerb::Update).await.unwrap();

        let approved = directory.approve_scope(reg.request.scope_id).await.unwrap().unwrap();
        assert!(approved.approved);
        let again = directory.approve_scope(reg.request.scope_id).await.unwrap().unwrap();
        assert!(again.approved);

        // re-registering never resets approval
        let reg = directory.register_scope("billing", ScopeVerb::Update).await.unwrap();
        assert!(reg.request.approved);
        assert!(directory.approve_scope(Uuid::new_v4()).await.unwrap().is_none());
    }
}
