//! Service model - registered services and the scopes they request.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Separator between service name and scope verb, e.g. `invoice-generator::read`.
pub const SCOPE_SEPARATOR: &str = "::";

static SERVICE_SCOPE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9]+(-[A-Za-z0-9]+)*::(read|write|update|create)$")
        .expect("service scope pattern is valid")
});

static SERVICE_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9]+(-[A-Za-z0-9]+)*$").expect("service name pattern is valid")
});

/// Permission verb a service may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeVerb {
    Read,
    Write,
    Update,
    Create,
}

impl ScopeVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeVerb::Read => "read",
            ScopeVerb::Write => "write",
            ScopeVerb::Update => "update",
            ScopeVerb::Create => "create",
        }
    }
}

impl std::str::FromStr for ScopeVerb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "read" => Ok(ScopeVerb::Read),
            "write" => Ok(ScopeVerb::Write),
            "update" => Ok(ScopeVerb::Update),
            "create" => Ok(ScopeVerb::Create),
            _ => Err(format!("Invalid scope: {}", s)),
        }
    }
}

impl std::fmt::Display for ScopeVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated `service::verb` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceScope {
    pub service: String,
    pub verb: ScopeVerb,
}

impl ServiceScope {
    pub fn new(service: &str, verb: ScopeVerb) -> Result<Self, String> {
        validate_service_name(service)?;
        Ok(Self {
            service: service.to_string(),
            verb,
        })
    }

    /// Parse the combined `service::verb` form.
    pub fn parse(value: &str) -> Result<Self, String> {
        if !SERVICE_SCOPE_REGEX.is_match(value) {
            return Err(format!(
                "Service scope must follow 'a-b-c::read|write|update|create' format, got '{}'",
                value
            ));
        }
        let (service, verb) = value
            .split_once(SCOPE_SEPARATOR)
            .ok_or_else(|| format!("Missing '{}' in '{}'", SCOPE_SEPARATOR, value))?;
        Ok(Self {
            service: service.to_string(),
            verb: verb.parse()?,
        })
    }

    /// Build from separately supplied parts.
    ///
    /// Returns `Ok(None)` when either part is missing or blank: a partial pair
    /// is dropped rather than half-applied.
    pub fn from_parts(service: Option<&str>, scope: Option<&str>) -> Result<Option<Self>, String> {
        match (non_blank(service), non_blank(scope)) {
            (Some(service), Some(scope)) => {
                Self::parse(&format!("{}{}{}", service, SCOPE_SEPARATOR, scope)).map(Some)
            }
            _ => Ok(None),
        }
    }
}

impl std::fmt::Display for ServiceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.service, SCOPE_SEPARATOR, self.verb)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn validate_service_name(name: &str) -> Result<(), String> {
    if SERVICE_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(format!(
            "Service name must be alphanumeric segments joined by '-', got '{}'",
            name
        ))
    }
}

/// A scope requested by a service. Approval is one-way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRequest {
    pub scope_id: Uuid,
    pub service_id: Uuid,
    pub scope: ScopeVerb,
    pub approved: bool,
    pub created_utc: DateTime<Utc>,
}

impl ScopeRequest {
    pub fn new(service_id: Uuid, scope: ScopeVerb) -> Self {
        Self {
            scope_id: Uuid::new_v4(),
            service_id,
            scope,
            approved: false,
            created_utc: Utc::now(),
        }
    }

    /// Mark approved. Returns `true` if this call changed the state.
    pub fn approve(&mut self) -> bool {
        let changed = !self.approved;
        self.approved = true;
        changed
    }
}

/// Service registration owning its scope requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredService {
    pub service_id: Uuid,
    pub service_name: String,
    pub scopes: Vec<ScopeRequest>,
    pub created_utc: DateTime<Utc>,
}

impl RegisteredService {
    pub fn new(service_name: String) -> Self {
        Self {
            service_id: Uuid::new_v4(),
            service_name,
            scopes: Vec::new(),
            created_utc: Utc::now(),
        }
    }

    pub fn scope(&self, verb: ScopeVerb) -> Option<&ScopeRequest> {
        self.scopes.iter().find(|s| s.scope == verb)
    }

    pub fn approved_scopes(&self) -> Vec<ScopeVerb> {
        self.scopes
            .iter()
            .filter(|s| s.approved)
            .map(|s| s.scope)
            .collect()
    }
}

/// Result of a scope status query.
///
/// Pending and never-requested scopes are reported alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeStatus {
    Approved,
    PendingOrUnknown,
}
