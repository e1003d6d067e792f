use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::role::Role;

/// Internal principal (user or service account) known to the directory.
#[derive(Clone, Serialize, Deserialize)]
pub struct Principal {
    pub principal_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub roles: BTreeSet<Role>,
    pub created_utc: DateTime<Utc>,
}

impl Principal {
    pub fn new(username: String, email: Option<String>, password_hash: String) -> Self {
        Self {
            principal_id: Uuid::new_v4(),
            username,
            email,
            password_hash,
            roles: BTreeSet::new(),
            created_utc: Utc::now(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.insert(role);
        self
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// `ROLE_*` authorities in stable order.
    pub fn authorities(&self) -> Vec<String> {
        self.roles.iter().map(Role::authority).collect()
    }

    pub fn summary(&self) -> PrincipalSummary {
        PrincipalSummary {
            principal_id: self.principal_id,
            username: self.username.clone(),
            roles: self.roles.iter().copied().collect(),
        }
    }
}

impl std::fmt::Debug for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Principal")
            .field("principal_id", &self.principal_id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

/// Listing view without credential material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrincipalSummary {
    pub principal_id: Uuid,
    pub username: String,
    pub roles: Vec<Role>,
}

/// Outcome of a role revocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleRevocation {
    Removed,
    NotHeld,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorities_are_sorted_and_prefixed() {
        let principal = Principal::new("jane_doe".into(), None, "hash".into())
            .with_role(Role::User)
            .with_role(Role::Client);

        assert_eq!(principal.authorities(), vec!["ROLE_CLIENT", "ROLE_USER"]);
    }

    #[test]
    fn test_role_set_semantics() {
        let principal = Principal::new("jane_doe".into(), None, "hash".into())
            .with_role(Role::Manager)
            .with_role(Role::Manager);
        assert_eq!(principal.roles.len(), 1);
        assert!(principal.has_role(Role::Manager));
    }

    #[test]
    fn test_debug_and_json_hide_password_hash() {
        let principal = Principal::new("jane_doe".into(), None, "$argon2id$secret".into());
        assert!(!format!("{:?}", principal).contains("argon2id"));
        let json = serde_json::to_string(&principal).unwrap();
        assert!(!json.contains("password_hash"));
    }
}
