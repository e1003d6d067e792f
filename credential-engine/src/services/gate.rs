use std::sync::Arc;

use super::authorization::AuthorizationModel;
use super::jwt::TokenIssuer;
use crate::models::PrincipalContext;

const BEARER_PREFIX: &str = "Bearer ";

/// Turns a presented access token into an authenticated principal context.
///
/// Every failure collapses to `None`; nothing propagates past the gate.
pub struct AuthenticationGate {
    issuer: Arc<TokenIssuer>,
    authz: Arc<AuthorizationModel>,
}

impl AuthenticationGate {
    pub fn new(issuer: Arc<TokenIssuer>, authz: Arc<AuthorizationModel>) -> Self {
        Self { issuer, authz }
    }

    pub async fn authenticate(&self, token: &str) -> Option<PrincipalContext> {
        let claims = match self.issuer.validate(token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(error = %e, "Rejected access token");
                return None;
            }
        };

        let service_scope = match claims.service_scope() {
            Ok(scope) => scope,
            Err(e) => {
                tracing::debug!(principal = %claims.sub, error = %e, "Rejected access token scope");
                return None;
            }
        };

        let authorities = match self.authz.permissions_for(&claims.sub).await {
            Ok(authorities) => authorities,
            Err(e) if e.is_not_found() => {
                tracing::debug!(principal = %claims.sub, "Token subject no longer exists");
                return None;
            }
            Err(e) => {
                tracing::warn!(principal = %claims.sub, error = %e, "Could not load authorities");
                return None;
            }
        };

        Some(PrincipalContext {
            username: claims.sub,
            authorities,
            service_scope,
        })
    }

    /// Accepts a raw `Authorization` header value.
    pub async fn authenticate_header(&self, header: Option<&str>) -> Option<PrincipalContext> {
        let token = header?.strip_prefix(BEARER_PREFIX)?.trim();
        if token.is_empty() {
            return None;
        }
        self.authenticate(token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtos::RegisterPrincipalRequest;
    use crate::models::{Role, ScopeVerb, ServiceScope};
    use crate::services::directory::InMemoryDirectory;
    use crate::test_support::{test_hasher, test_issuer};

    async fn gate() -> (AuthenticationGate, Arc<TokenIssuer>, Arc<AuthorizationModel>) {
        let issuer = Arc::new(test_issuer());
        let authz = Arc::new(AuthorizationModel::new(
            Arc::new(InMemoryDirectory::new()),
            test_hasher(),
            8,
        ));
        authz
            .register_principal(&RegisterPrincipalRequest::new("jane_doe", "securePassword", Role::Client))
            .await
            .unwrap();
        (
            AuthenticationGate::new(Arc::clone(&issuer), Arc::clone(&authz)),
            issuer,
            authz,
        )
    }

    #[tokio::test]
    async fn test_valid_token_yields_context_with_current_roles() {
        let (gate, issuer, authz) = gate().await;
        let scope = ServiceScope::new("invoice-generator", ScopeVerb::Read).unwrap();
        let issued = issuer
            .issue("jane_doe", vec![Role::Client.authority()], Some(&scope))
            .unwrap();

        let jane = authz.find_principal_by_name("jane_doe").await.unwrap().unwrap();
        authz.assign_role(jane.principal_id, Role::Manager).await.unwrap();

        let context = gate.authenticate(&issued.token).await.unwrap();
        assert_eq!(context.username, "jane_doe");
        assert!(context.has_role(Role::Manager));
        assert_eq!(context.service_scope, Some(scope));
    }

    #[tokio::test]
    async fn test_garbage_and_unknown_subject_are_unauthenticated() {
        let (gate, issuer, _) = gate().await;
        assert!(gate.authenticate("not.a.jwt").await.is_none());

        let ghost = issuer.issue("ghost", vec![], None).unwrap();
        assert!(gate.authenticate(&ghost.token).await.is_none());
    }

    #[tokio::test]
    async fn test_header_parsing() {
        let (gate, issuer, _) = gate().await;
        let issued = issuer.issue("jane_doe", vec![], None).unwrap();

        assert!(gate.authenticate_header(None).await.is_none());
        assert!(gate.authenticate_header(Some("Bearer ")).await.is_none());
        assert!(gate.authenticate_header(Some(&issued.token)).await.is_none());
        assert!(gate
            .authenticate_header(Some(&format!("Bearer {}", issued.token)))
            .await
            .is_some());
    }
}
