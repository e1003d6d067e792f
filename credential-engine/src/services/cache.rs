//! Process-local access token cache.
//!
//! Reads and writes on disjoint keys never serialise against each other.
//! A `get` that finds an expired entry removes it under the same shard lock.

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::models::{ScopeVerb, ServiceScope};

/// Identity of a cached token: principal plus optional service scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub principal: String,
    pub service: Option<String>,
    pub scope: Option<ScopeVerb>,
}

impl CacheKey {
    pub fn new(principal: &str, service_scope: Option<&ServiceScope>) -> Self {
        Self {
            principal: principal.to_string(),
            service: service_scope.map(|s| s.service.clone()),
            scope: service_scope.map(|s| s.verb),
        }
    }
}

/// A signed access token and the authorities embedded in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub authorities: Vec<String>,
}

impl CachedToken {
    pub fn new(token: String, expires_at: DateTime<Utc>, authorities: Vec<String>) -> Self {
        Self {
            token,
            expires_at,
            authorities,
        }
    }

    /// True when the token was signed for exactly these authorities.
    pub fn carries(&self, authorities: &[String]) -> bool {
        self.authorities == authorities
    }

    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Default)]
pub struct CredentialCache {
    entries: DashMap<CacheKey, CachedToken>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins.
    pub fn put(&self, key: CacheKey, entry: CachedToken) {
        self.entries.insert(key, entry);
    }

    pub fn get(&self, key: &CacheKey) -> Option<CachedToken> {
        self.get_at(key, Utc::now())
    }

    fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CachedToken> {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(entry) if entry.get().is_expired_at(now) => {
                entry.remove();
                tracing::debug!(principal = %key.principal, "Evicted expired cached token");
                None
            }
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(_) => None,
        }
    }

    /// Drop every entry held for `principal`.
    pub fn evict_principal(&self, principal: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.principal != principal);
        before.saturating_sub(self.entries.len())
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Periodically purge expired entries until the handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, remaining = cache.len(), "Credential cache swept");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn key(principal: &str) -> CacheKey {
        CacheKey::new(principal, None)
    }

    fn entry(token: &str, expires_at: DateTime<Utc>) -> CachedToken {
        CachedToken::new(token.to_string(), expires_at, vec!["ROLE_CLIENT".to_string()])
    }

    #[test]
    fn test_put_then_get() {
        let cache = CredentialCache::new();
        let expiry = Utc::now() + ChronoDuration::hours(1);
        cache.put(key("jane_doe"), entry("token-a", expiry));

        let hit = cache.get(&key("jane_doe")).unwrap();
        assert_eq!(hit.token, "token-a");
        assert_eq!(hit.expires_at, expiry);
    }

    #[test]
    fn test_expired_entry_is_absent_and_evicted() {
        let cache = CredentialCache::new();
        let expiry = Utc::now() + ChronoDuration::seconds(30);
        cache.put(key("jane_doe"), entry("token-a", expiry));

        assert!(cache.get_at(&key("jane_doe"), expiry - ChronoDuration::seconds(1)).is_some());
        assert!(cache.get_at(&key("jane_doe"), expiry).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_scope_is_part_of_key() {
        let cache = CredentialCache::new();
        let read = ServiceScope::parse("invoice-generator::read").unwrap();
        let write = ServiceScope::parse("invoice-generator::write").unwrap();
        let expiry = Utc::now() + ChronoDuration::hours(1);

        cache.put(CacheKey::new("jane_doe", Some(&read)), entry("read-token", expiry));

        assert!(cache.get(&CacheKey::new("jane_doe", Some(&write))).is_none());
        assert!(cache.get(&key("jane_doe")).is_none());
        assert_eq!(
            cache.get(&CacheKey::new("jane_doe", Some(&read))).unwrap().token,
            "read-token"
        );
    }

    #[test]
    fn test_entry_remembers_authorities() {
        let cache = CredentialCache::new();
        cache.put(key("jane_doe"), entry("token-a", Utc::now() + ChronoDuration::hours(1)));

        let hit = cache.get(&key("jane_doe")).unwrap();
        assert!(hit.carries(&["ROLE_CLIENT".to_string()]));
        assert!(!hit.carries(&["ROLE_MANAGER".to_string(), "ROLE_CLIENT".to_string()]));
        assert!(!hit.carries(&[]));
    }

    #[test]
    fn test_last_write_wins() {
        let cache = CredentialCache::new();
        let expiry = Utc::now() + ChronoDuration::hours(1);
        cache.put(key("jane_doe"), entry("first", expiry));
        cache.put(key("jane_doe"), entry("second", expiry));
        assert_eq!(cache.get(&key("jane_doe")).unwrap().token, "second");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_purge_and_evict_principal() {
        let cache = CredentialCache::new();
        let live = Utc::now() + ChronoDuration::hours(1);
        let dead = Utc::now() - ChronoDuration::seconds(1);
        let scope = ServiceScope::parse("billing::read").unwrap();

        cache.put(key("jane_doe"), entry("a", live));
        cache.put(CacheKey::new("jane_doe", Some(&scope)), entry("b", live));
        cache.put(key("john"), entry("c", dead));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.evict_principal("jane_doe"), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_purges_in_background() {
        let cache = Arc::new(CredentialCache::new());
        cache.put(key("jane_doe"), entry("a", Utc::now() - ChronoDuration::seconds(1)));

        let handle = cache.spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert!(cache.is_empty());
    }
}
