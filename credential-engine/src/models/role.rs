//! Role model - the closed set of roles a principal can hold.

use serde::{Deserialize, Serialize};

/// Prefix that turns a role name into a granted authority.
pub const AUTHORITY_PREFIX: &str = "ROLE_";

/// Roles known to the gateway.
///
/// Stored once per name in the directory and referenced by principals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Manager,
    Client,
    Service,
    Hr,
    User,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Admin,
        Role::Manager,
        Role::Client,
        Role::Service,
        Role::Hr,
        Role::User,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Manager => "MANAGER",
            Role::Client => "CLIENT",
            Role::Service => "SERVICE",
            Role::Hr => "HR",
            Role::User => "USER",
        }
    }

    /// Authority string carried in tokens, e.g. `ROLE_CLIENT`.
    pub fn authority(&self) -> String {
        format!("{}{}", AUTHORITY_PREFIX, self.as_str())
    }

    /// Parse an authority string back into a role.
    pub fn from_authority(authority: &str) -> Option<Role> {
        authority
            .strip_prefix(AUTHORITY_PREFIX)
            .and_then(|name| name.parse().ok())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    /// Case-insensitive; an optional `ROLE_` prefix is accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        let name = upper.strip_prefix(AUTHORITY_PREFIX).unwrap_or(upper.as_str());
        Role::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == name)
            .ok_or_else(|| format!("Invalid role: {}", s))
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_format() {
        assert_eq!(Role::Client.authority(), "ROLE_CLIENT");
        assert_eq!(Role::Hr.authority(), "ROLE_HR");
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("manager".parse::<Role>(), Ok(Role::Manager));
        assert_eq!("Admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!("ROLE_service".parse::<Role>(), Ok(Role::Service));
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert!("SUPERUSER".parse::<Role>().is_err());
        assert!("".parse::<Role>().is_err());
    }

    #[test]
    fn test_from_authority_requires_prefix() {
        assert_eq!(Role::from_authority("ROLE_USER"), Some(Role::User));
        assert_eq!(Role::from_authority("USER"), None);
    }

    #[test]
    fn test_serde_uses_upper_case_names() {
        let json = serde_json::to_string(&Role::Hr).unwrap();
        assert_eq!(json, "\"HR\"");
        let role: Role = serde_json::from_str("\"CLIENT\"").unwrap();
        assert_eq!(role, Role::Client);
    }
}
