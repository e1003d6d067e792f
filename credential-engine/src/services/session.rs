//! Access/refresh token pair lifecycle.
//!
//! Per principal the persisted refresh record drives a small state machine:
//!
//! 1. no record: mint a refresh id, issue an access token, persist, cache
//! 2. record expired: issue an access token and renew the record
//! 3. record valid: serve the cached access token, or re-sign on a miss
//!
//! All store writes are conditional. A writer that loses a race adopts
//! whatever the winner stored and re-enters the state machine.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use validator::Validate;

use super::authorization::AuthorizationModel;
use super::cache::{CacheKey, CachedToken, CredentialCache};
use super::error::{EngineError, EngineResult};
use super::jwt::{IssuedToken, TokenIssuer};
use super::refresh_store::{RefreshStore, StoreWrite};
use crate::config::SessionConfig;
use crate::dtos::{LogoutRequest, RefreshRequest, TokenPair, TokenRequest};
use crate::models::refresh_token::fingerprint;
use crate::models::{Principal, RefreshToken, ServiceScope};

const MAX_WRITE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub refresh_token_ttl_seconds: i64,
    /// Mint a new identifier when an expired record is renewed
    pub rotate_refresh_on_renewal: bool,
    /// Refuse to embed service scopes that are not approved
    pub require_approved_scope: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            refresh_token_ttl_seconds: config.refresh_token_ttl_seconds,
            rotate_refresh_on_renewal: config.rotate_refresh_on_renewal,
            require_approved_scope: config.require_approved_scope,
        }
    }
}

enum Attempt {
    Done(TokenPair),
    Superseded(Option<RefreshToken>),
}

pub struct SessionManager {
    issuer: Arc<TokenIssuer>,
    cache: Arc<CredentialCache>,
    store: Arc<dyn RefreshStore>,
    authz: Arc<AuthorizationModel>,
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(
        issuer: Arc<TokenIssuer>,
        cache: Arc<CredentialCache>,
        store: Arc<dyn RefreshStore>,
        authz: Arc<AuthorizationModel>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            issuer,
            cache,
            store,
            authz,
            settings,
        }
    }

    /// Authenticate with username/password and return a token pair.
    pub async fn get_token(&self, req: &TokenRequest) -> EngineResult<TokenPair> {
        req.validate()?;
        let service_scope = req.service_scope()?;
        let principal = self
            .authz
            .verify_credentials(&req.username, &req.password)
            .await?;
        self.get_or_create(&principal, service_scope.as_ref()).await
    }

    /// Token pair for an already authenticated principal.
    pub async fn get_or_create(
        &self,
        principal: &Principal,
        service_scope: Option<&ServiceScope>,
    ) -> EngineResult<TokenPair> {
        self.check_scope(service_scope).await?;

        let mut current = self
            .store
            .find_by_principal(&principal.username)
            .await
            .map_err(EngineError::store)?;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let outcome = match current {
                None => self.mint(principal, service_scope).await?,
                Some(record) if record.is_expired() => {
                    self.renew(principal, record, service_scope).await?
                }
                Some(record) => return self.reuse(principal, &record, service_scope),
            };

            match outcome {
                Attempt::Done(pair) => return Ok(pair),
                Attempt::Superseded(winner) => {
                    tracing::debug!(principal = %principal.username, attempt, "Refresh record changed concurrently");
                    current = winner;
                }
            }
        }

        tracing::warn!(principal = %principal.username, "Gave up writing refresh record after repeated contention");
        Err(EngineError::Conflict(
            "Refresh token was modified concurrently".to_string(),
        ))
    }

    /// Exchange a refresh identifier for a new access token.
    ///
    /// Returns the same identifier and never extends the record's expiry.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        service_scope: Option<&ServiceScope>,
    ) -> EngineResult<TokenPair> {
        let record = self
            .store
            .find_by_token(refresh_token)
            .await
            .map_err(EngineError::store)?
            .ok_or_else(|| {
                tracing::debug!(refresh = %fingerprint(refresh_token), "Refresh token not found");
                EngineError::RefreshTokenNotFound
            })?;

        if record.is_expired() {
            tracing::debug!(principal = %record.principal, refresh = %record.fingerprint(), "Refresh token expired");
            return Err(EngineError::RefreshTokenExpired);
        }

        self.check_scope(service_scope).await?;

        let principal = self
            .authz
            .find_principal_by_name(&record.principal)
            .await?
            .ok_or(EngineError::PrincipalNotFound)?;

        let issued = self.issue(&principal, service_scope)?;
        self.cache_token(&principal, service_scope, &issued);

        tracing::info!(principal = %principal.username, refresh = %record.fingerprint(), "Access token refreshed");
        Ok(pair(issued, &record))
    }

    pub async fn refresh_request(&self, req: &RefreshRequest) -> EngineResult<TokenPair> {
        req.validate()?;
        let service_scope = req.service_scope()?;
        self.refresh(&req.refresh_token, service_scope.as_ref()).await
    }

    /// Delete the refresh record. An unknown identifier yields `RefreshTokenNotFound`.
    pub async fn logout(&self, refresh_token: &str) -> EngineResult<()> {
        match self
            .store
            .delete(refresh_token)
            .await
            .map_err(EngineError::store)?
        {
            Some(record) => {
                self.cache.evict_principal(&record.principal);
                tracing::info!(principal = %record.principal, refresh = %record.fingerprint(), "Refresh token revoked");
                Ok(())
            }
            None => {
                tracing::debug!(refresh = %fingerprint(refresh_token), "Logout for unknown refresh token");
                Err(EngineError::RefreshTokenNotFound)
            }
        }
    }

    pub async fn logout_request(&self, req: &LogoutRequest) -> EngineResult<()> {
        req.validate()?;
        self.logout(&req.refresh_token).await
    }

    async fn mint(
        &self,
        principal: &Principal,
        service_scope: Option<&ServiceScope>,
    ) -> EngineResult<Attempt> {
        let issued = self.issue(principal, service_scope)?;
        let record = RefreshToken::new(principal.username.clone(), self.refresh_expiry(&issued));

        match self
            .store
            .insert_if_absent(&record)
            .await
            .map_err(EngineError::store)?
        {
            StoreWrite::Applied => {
                self.cache_token(principal, service_scope, &issued);
                tracing::info!(principal = %principal.username, refresh = %record.fingerprint(), "Refresh token minted");
                Ok(Attempt::Done(pair(issued, &record)))
            }
            StoreWrite::Superseded(winner) => Ok(Attempt::Superseded(winner)),
        }
    }

    async fn renew(
        &self,
        principal: &Principal,
        expired: RefreshToken,
        service_scope: Option<&ServiceScope>,
    ) -> EngineResult<Attempt> {
        let issued = self.issue(principal, service_scope)?;
        let expires_at = self.refresh_expiry(&issued);
        let record = if self.settings.rotate_refresh_on_renewal {
            RefreshToken::new(principal.username.clone(), expires_at)
        } else {
            expired.renewed(expires_at)
        };

        match self
            .store
            .replace(&expired.token_id, &record)
            .await
            .map_err(EngineError::store)?
        {
            StoreWrite::Applied => {
                self.cache_token(principal, service_scope, &issued);
                tracing::info!(
                    principal = %principal.username,
                    refresh = %record.fingerprint(),
                    rotated = self.settings.rotate_refresh_on_renewal,
                    "Refresh token renewed"
                );
                Ok(Attempt::Done(pair(issued, &record)))
            }
            StoreWrite::Superseded(winner) => Ok(Attempt::Superseded(winner)),
        }
    }

    fn reuse(
        &self,
        principal: &Principal,
        record: &RefreshToken,
        service_scope: Option<&ServiceScope>,
    ) -> EngineResult<TokenPair> {
        let key = CacheKey::new(&principal.username, service_scope);
        match self.cache.get(&key) {
            Some(cached) if cached.carries(&principal.authorities()) => {
                tracing::debug!(principal = %principal.username, "Serving cached access token");
                return Ok(TokenPair::new(
                    cached.token,
                    cached.expires_at,
                    record.token_id.clone(),
                    record.expires_at,
                ));
            }
            Some(_) => {
                tracing::debug!(principal = %principal.username, "Cached access token has outdated authorities");
            }
            None => {}
        }

        let issued = self.issue(principal, service_scope)?;
        self.cache_token(principal, service_scope, &issued);
        Ok(pair(issued, record))
    }

    fn issue(
        &self,
        principal: &Principal,
        service_scope: Option<&ServiceScope>,
    ) -> EngineResult<IssuedToken> {
        self.issuer
            .issue(&principal.username, principal.authorities(), service_scope)
    }

    fn cache_token(
        &self,
        principal: &Principal,
        service_scope: Option<&ServiceScope>,
        issued: &IssuedToken,
    ) {
        self.cache.put(
            CacheKey::new(&principal.username, service_scope),
            CachedToken::new(
                issued.token.clone(),
                issued.expires_at,
                issued.claims.authorities.clone(),
            ),
        );
    }

    /// Refresh expiry counts from the access token's issued-at.
    fn refresh_expiry(&self, issued: &IssuedToken) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(issued.claims.iat, 0).unwrap_or_else(Utc::now)
            + Duration::seconds(self.settings.refresh_token_ttl_seconds)
    }

    async fn check_scope(&self, service_scope: Option<&ServiceScope>) -> EngineResult<()> {
        let Some(scope) = service_scope else {
            return Ok(());
        };
        if self.settings.require_approved_scope && !self.authz.is_scope_approved(scope).await? {
            tracing::debug!(service = %scope.service, scope = %scope.verb, "Service scope not approved");
            return Err(EngineError::ScopeNotFound);
        }
        Ok(())
    }
}

fn pair(issued: IssuedToken, record: &RefreshToken) -> TokenPair {
    TokenPair::new(
        issued.token,
        issued.expires_at,
        record.token_id.clone(),
        record.expires_at,
    )
}
