use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use redis::{aio::ConnectionManager, Client, Script};

use super::refresh_store::{RefreshStore, StoreWrite};
use crate::config::RedisConfig;
use crate::models::RefreshToken;

const APPLIED: &str = "applied";

// KEYS: principal slot, token key. ARGV: token id, record json, ttl seconds
static INSERT_IF_ABSENT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local current = redis.call('GET', KEYS[1])
if current then
    return {'superseded', current}
end
redis.call('SET', KEYS[2], ARGV[2], 'EX', ARGV[3])
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[3])
return {'applied'}
"#,
    )
});

// KEYS: principal slot, old token key, new token key.
// ARGV: expected id, new id, record json, ttl seconds
static REPLACE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return {'superseded'}
end
if current ~= ARGV[1] then
    return {'superseded', current}
end
redis.call('DEL', KEYS[2])
redis.call('SET', KEYS[3], ARGV[3], 'EX', ARGV[4])
redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[4])
return {'applied'}
"#,
    )
});

// KEYS: token key, principal slot. ARGV: token id
static DELETE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local removed = redis.call('DEL', KEYS[1])
if redis.call('GET', KEYS[2]) == ARGV[1] then
    redis.call('DEL', KEYS[2])
end
return removed
"#,
    )
});

/// Refresh store backed by Redis.
///
/// Records are JSON under `{prefix}refresh:token:{id}`; the principal slot
/// `{prefix}refresh:principal:{name}` points at the live identifier. Keys
/// outlive the record's expiry by the retention window so an expired record
/// is still reported as expired rather than unknown.
#[derive(Clone)]
pub struct RedisRefreshStore {
    _client: Client,
    manager: ConnectionManager,
    key_prefix: String,
    retention_seconds: i64,
}

impl RedisRefreshStore {
    pub async fn new(config: &RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %config.url, "Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // Use ConnectionManager for automatic reconnection
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
            key_prefix: config.key_prefix.clone(),
            retention_seconds: config.retention_seconds,
        })
    }

    fn token_key(&self, token_id: &str) -> String {
        format!("{}refresh:token:{}", self.key_prefix, token_id)
    }

    fn principal_key(&self, principal: &str) -> String {
        format!("{}refresh:principal:{}", self.key_prefix, principal)
    }

    fn ttl_seconds(&self, record: &RefreshToken) -> i64 {
        let remaining = (record.expires_at - Utc::now()).num_seconds();
        (remaining.max(0) + self.retention_seconds).max(1)
    }

    async fn interpret(&self, reply: Vec<String>) -> Result<StoreWrite, anyhow::Error> {
        match reply.as_slice() {
            [status] if status == APPLIED => Ok(StoreWrite::Applied),
            [_] => Ok(StoreWrite::Superseded(None)),
            [_, current] => Ok(StoreWrite::Superseded(self.find_by_token(current).await?)),
            _ => Err(anyhow::anyhow!("Unexpected refresh store reply: {:?}", reply)),
        }
    }
}

#[async_trait]
impl RefreshStore for RedisRefreshStore {
    async fn find_by_token(&self, token_id: &str) -> Result<Option<RefreshToken>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.token_key(token_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read refresh token: {}", e))?;

        raw.map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| anyhow::anyhow!("Corrupt refresh token record: {}", e))
        })
        .transpose()
    }

    async fn find_by_principal(
        &self,
        principal: &str,
    ) -> Result<Option<RefreshToken>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let token_id: Option<String> = redis::cmd("GET")
            .arg(self.principal_key(principal))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read principal refresh slot: {}", e))?;

        match token_id {
            Some(id) => self.find_by_token(&id).await,
            None => Ok(None),
        }
    }

    async fn insert_if_absent(&self, record: &RefreshToken) -> Result<StoreWrite, anyhow::Error> {
        let mut conn = self.manager.clone();
        let json = serde_json::to_string(record)?;
        let reply: Vec<String> = INSERT_IF_ABSENT
            .key(self.principal_key(&record.principal))
            .key(self.token_key(&record.token_id))
            .arg(&record.token_id)
            .arg(json)
            .arg(self.ttl_seconds(record))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to insert refresh token: {}", e))?;

        self.interpret(reply).await
    }

    async fn replace(
        &self,
        expected_token_id: &str,
        record: &RefreshToken,
    ) -> Result<StoreWrite, anyhow::Error> {
        let mut conn = self.manager.clone();
        let json = serde_json::to_string(record)?;
        let reply: Vec<String> = REPLACE
            .key(self.principal_key(&record.principal))
            .key(self.token_key(expected_token_id))
            .key(self.token_key(&record.token_id))
            .arg(expected_token_id)
            .arg(&record.token_id)
            .arg(json)
            .arg(self.ttl_seconds(record))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to replace refresh token: {}", e))?;

        self.interpret(reply).await
    }

    async fn delete(&self, token_id: &str) -> Result<Option<RefreshToken>, anyhow::Error> {
        let Some(record) = self.find_by_token(token_id).await? else {
            return Ok(None);
        };

        let mut conn = self.manager.clone();
        let removed: i64 = DELETE
            .key(self.token_key(token_id))
            .key(self.principal_key(&record.principal))
            .arg(token_id)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete refresh token: {}", e))?;

        Ok((removed > 0).then_some(record))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn store() -> Option<RedisRefreshStore> {
        let url = std::env::var("REDIS_URL").ok()?;
        let config = RedisConfig {
            url,
            key_prefix: format!("test:{}:", uuid::Uuid::new_v4()),
            retention_seconds: 60,
        };
        Some(RedisRefreshStore::new(&config).await.expect("redis should connect"))
    }

    #[tokio::test]
    async fn test_redis_conditional_writes() {
        let Some(store) = store().await else {
            return;
        };
        store.health_check().await.unwrap();

        let first = RefreshToken::new("jane_doe".into(), Utc::now() + Duration::hours(1));
        let second = RefreshToken::new("jane_doe".into(), Utc::now() + Duration::hours(1));

        assert_eq!(store.insert_if_absent(&first).await.unwrap(), StoreWrite::Applied);
        assert_eq!(
            store.insert_if_absent(&second).await.unwrap(),
            StoreWrite::Superseded(Some(first.clone()))
        );

        assert_eq!(store.replace(&first.token_id, &second).await.unwrap(), StoreWrite::Applied);
        assert!(store.find_by_token(&first.token_id).await.unwrap().is_none());
        assert_eq!(
            store.find_by_principal("jane_doe").await.unwrap(),
            Some(second.clone())
        );

        assert_eq!(store.delete(&second.token_id).await.unwrap(), Some(second.clone()));
        assert_eq!(store.delete(&second.token_id).await.unwrap(), None);
        assert!(store.find_by_principal("jane_doe").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_redis_keeps_expired_records_observable() {
        let Some(store) = store().await else {
            return;
        };
        let expired = RefreshToken::new("john".into(), Utc::now() - Duration::seconds(5));
        store.insert_if_absent(&expired).await.unwrap();

        let found = store.find_by_token(&expired.token_id).await.unwrap().unwrap();
        assert!(found.is_expired());
        store.delete(&expired.token_id).await.unwrap();
    }
}
