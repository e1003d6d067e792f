use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Refresh token record persisted in the refresh store.
///
/// The identifier is the bearer secret itself; one record exists per principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    /// Opaque identifier handed to the client
    pub token_id: String,

    /// Principal this token belongs to
    pub principal: String,

    /// Absolute expiry instant
    pub expires_at: DateTime<Utc>,

    /// When this record was written
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    /// Create a record with a freshly generated identifier.
    pub fn new(principal: String, expires_at: DateTime<Utc>) -> Self {
        Self::with_id(generate_token_id(), principal, expires_at)
    }

    pub fn with_id(token_id: String, principal: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            token_id,
            principal,
            expires_at,
            created_at: Utc::now(),
        }
    }

    /// Same identifier, new expiry.
    pub fn renewed(&self, expires_at: DateTime<Utc>) -> Self {
        Self::with_id(self.token_id.clone(), self.principal.clone(), expires_at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Short prefix of the identifier, safe for logs.
    pub fn fingerprint(&self) -> &str {
        fingerprint(&self.token_id)
    }
}

/// 32 random bytes, hex encoded.
pub fn generate_token_id() -> String {
    let mut rng = rand::thread_rng();
    let token_bytes: [u8; 32] = rng.gen();
    hex::encode(token_bytes)
}

pub fn fingerprint(token_id: &str) -> &str {
    token_id.get(..8).unwrap_or(token_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_refresh_token_creation() {
        let token = RefreshToken::new("jane_doe".to_string(), Utc::now() + Duration::hours(1));

        assert_eq!(token.principal, "jane_doe");
        assert_eq!(token.token_id.len(), 64);
        assert!(token.token_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!token.is_expired());
    }

    #[test]
    fn test_token_ids_are_unique() {
        assert_ne!(generate_token_id(), generate_token_id());
    }

    #[test]
    fn test_refresh_token_expiry() {
        let mut token = RefreshToken::new("jane_doe".to_string(), Utc::now() + Duration::hours(1));
        assert!(!token.is_expired());

        token.expires_at = Utc::now() - Duration::seconds(1);
        assert!(token.is_expired());
    }

    #[test]
    fn test_renewed_keeps_identifier() {
        let token = RefreshToken::new("jane_doe".to_string(), Utc::now() - Duration::seconds(5));
        let renewed = token.renewed(Utc::now() + Duration::hours(1));

        assert_eq!(renewed.token_id, token.token_id);
        assert_eq!(renewed.principal, token.principal);
        assert!(!renewed.is_expired());
    }

    #[test]
    fn test_fingerprint_is_short() {
        let token = RefreshToken::new("jane_doe".to_string(), Utc::now());
        assert_eq!(token.fingerprint().len(), 8);
        assert_eq!(fingerprint("abc"), "abc");
    }
}
