use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, encode, errors::ErrorKind, Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::error::{EngineError, EngineResult};
use super::keys::KeyManager;
use crate::models::ServiceScope;

pub const DEFAULT_ISSUER: &str = "https://auth.gateway.local";
pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 3600;

/// Claims carried by access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (principal name)
    pub sub: String,
    /// Issuer
    pub iss: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// JWT ID
    pub jti: String,
    /// Granted `ROLE_*` authorities
    pub authorities: Vec<String>,
    /// Scope verb, present only together with `service-name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(rename = "service-name", default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
}

impl AccessTokenClaims {
    /// Service scope embedded in the token, if any.
    ///
    /// A token carrying only half of the pair is malformed.
    pub fn service_scope(&self) -> EngineResult<Option<ServiceScope>> {
        match (&self.service_name, &self.scope) {
            (None, None) => Ok(None),
            (Some(service), Some(scope)) => {
                ServiceScope::from_parts(Some(service), Some(scope)).map_err(EngineError::MalformedToken)
            }
            _ => Err(EngineError::MalformedToken(
                "scope and service-name must appear together".to_string(),
            )),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        timestamp_to_utc(self.exp)
    }
}

/// A signed access token and the claims it was built from.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: AccessTokenClaims,
    pub expires_at: DateTime<Utc>,
}

/// Builds, signs and validates RS256 access tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    keys: Arc<KeyManager>,
    issuer: String,
    access_token_ttl_seconds: i64,
}

impl TokenIssuer {
    pub fn new(keys: Arc<KeyManager>, issuer: impl Into<String>, access_token_ttl_seconds: i64) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            access_token_ttl_seconds,
        }
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Sign an access token for `subject`.
    ///
    /// Expiry is fixed once here as issued-at plus the configured TTL.
    pub fn issue(
        &self,
        subject: &str,
        authorities: Vec<String>,
        service_scope: Option<&ServiceScope>,
    ) -> EngineResult<IssuedToken> {
        let iat = Utc::now().timestamp();
        let exp = iat + self.access_token_ttl_seconds;

        let claims = AccessTokenClaims {
            sub: subject.to_string(),
            iss: self.issuer.clone(),
            iat,
            exp,
            jti: Uuid::new_v4().to_string(),
            authorities,
            scope: service_scope.map(|s| s.verb.to_string()),
            service_name: service_scope.map(|s| s.service.clone()),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.keys.key_id().to_string());

        let token = encode(&header, &claims, self.keys.private_key()?)
            .map_err(|e| EngineError::Internal(format!("Failed to encode access token: {}", e)))?;

        tracing::debug!(principal = %subject, exp, "Access token issued");

        Ok(IssuedToken {
            token,
            expires_at: timestamp_to_utc(exp),
            claims,
        })
    }

    /// Verify signature, issuer and expiry; return the claims.
    ///
    /// No leeway is applied to `exp`.
    pub fn validate(&self, token: &str) -> EngineResult<AccessTokenClaims> {
        let header = decode_header(token).map_err(map_jwt_error)?;
        if header.kid.as_deref() != Some(self.keys.key_id()) {
            return Err(EngineError::InvalidSignature);
        }

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);

        let token_data = decode::<AccessTokenClaims>(token, self.keys.public_key()?, &validation)
            .map_err(map_jwt_error)?;

        token_data.claims.service_scope()?;
        Ok(token_data.claims)
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> EngineError {
    match err.kind() {
        ErrorKind::ExpiredSignature => EngineError::TokenExpired,
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm | ErrorKind::InvalidRsaKey(_) => {
            EngineError::InvalidSignature
        }
        _ => EngineError::MalformedToken(err.to_string()),
    }
}

fn timestamp_to_utc(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
