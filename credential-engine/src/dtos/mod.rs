pub mod admin;
pub mod auth;

pub use admin::{RegisterPrincipalRequest, ServiceRegistrationRequest};
pub use auth::{LogoutRequest, RefreshRequest, TokenPair, TokenRequest};
