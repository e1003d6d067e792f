pub mod context;
pub mod principal;
pub mod refresh_token;
pub mod role;
pub mod service;

pub use context::PrincipalContext;
pub use principal::{Principal, PrincipalSummary, RoleRevocation};
pub use refresh_token::RefreshToken;
pub use role::Role;
pub use service::{RegisteredService, ScopeRequest, ScopeStatus, ScopeVerb, ServiceScope};
