use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::RefreshToken;

/// Outcome of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWrite {
    Applied,
    /// Another writer got there first; carries the principal's current record
    Superseded(Option<RefreshToken>),
}

/// Durable mapping from refresh identifier to (principal, expiry).
///
/// A principal owns at most one record. Writers coordinate through the
/// conditional operations instead of blind upserts.
#[async_trait]
pub trait RefreshStore: Send + Sync {
    async fn find_by_token(&self, token_id: &str) -> Result<Option<RefreshToken>, anyhow::Error>;

    async fn find_by_principal(
        &self,
        principal: &str,
    ) -> Result<Option<RefreshToken>, anyhow::Error>;

    /// Write `record` only if its principal has no record yet.
    async fn insert_if_absent(&self, record: &RefreshToken) -> Result<StoreWrite, anyhow::Error>;

    /// Swap the principal's record for `record` only if the current one
    /// still has `expected_token_id`.
    async fn replace(
        &self,
        expected_token_id: &str,
        record: &RefreshToken,
    ) -> Result<StoreWrite, anyhow::Error>;

    /// Remove a record. Returns what was removed, if anything.
    async fn delete(&self, token_id: &str) -> Result<Option<RefreshToken>, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Default)]
struct Records {
    by_id: HashMap<String, RefreshToken>,
    by_principal: HashMap<String, String>,
}

impl Records {
    fn current_for(&self, principal: &str) -> Option<RefreshToken> {
        self.by_principal
            .get(principal)
            .and_then(|id| self.by_id.get(id))
            .cloned()
    }

    fn store(&mut self, record: &RefreshToken) {
        self.by_principal
            .insert(record.principal.clone(), record.token_id.clone());
        self.by_id.insert(record.token_id.clone(), record.clone());
    }
}

/// Single-process store. Both indexes sit behind one lock so they never disagree.
#[derive(Default)]
pub struct InMemoryRefreshStore {
    records: Mutex<Records>,
}

impl InMemoryRefreshStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Records>, anyhow::Error> {
        self.records
            .lock()
            .map_err(|e| anyhow::anyhow!("Refresh store mutex poisoned: {}", e))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|r| r.by_id.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RefreshStore for InMemoryRefreshStore {
    async fn find_by_token(&self, token_id: &str) -> Result<Option<RefreshToken>, anyhow::Error> {
        Ok(self.lock()?.by_id.get(token_id).cloned())
    }

    async fn find_by_principal(
        &self,
        principal: &str,
    ) -> Result<Option<RefreshToken>, anyhow::Error> {
        Ok(self.lock()?.current_for(principal))
    }

    async fn insert_if_absent(&self, record: &RefreshToken) -> Result<StoreWrite, anyhow::Error> {
        let mut records = self.lock()?;
        if records.by_principal.contains_key(&record.principal) {
            return Ok(StoreWrite::Superseded(records.current_for(&record.principal)));
        }
        records.store(record);
        Ok(StoreWrite::Applied)
    }

    async fn replace(
        &self,
        expected_token_id: &str,
        record: &RefreshToken,
    ) -> Result<StoreWrite, anyhow::Error> {
        let mut records = self.lock()?;
        let current = records.by_principal.get(&record.principal).cloned();
        if current.as_deref() != Some(expected_token_id) {
            return Ok(StoreWrite::Superseded(records.current_for(&record.principal)));
        }
        records.by_id.remove(expected_token_id);
        records.store(record);
        Ok(StoreWrite::Applied)
    }

    async fn delete(&self, token_id: &str) -> Result<Option<RefreshToken>, anyhow::Error> {
        let mut records = self.lock()?;
        let removed = records.by_id.remove(token_id);
        if let Some(record) = &removed {
            if records.by_principal.get(&record.principal).map(String::as_str) == Some(token_id) {
                records.by_principal.remove(&record.principal);
            }
        }
        Ok(removed)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.lock().map(|_| ())
    }
}
