//! In-memory state storage backend.
//!
//! Used for tests and for plan previews that must not touch durable
//! state. The whole map sits behind one `RwLock`, which trivially
//! serializes writes to the same logical name.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::record::StateRecord;
use super::store::{StateStore, StoreResult};

/// In-memory state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: RwLock<BTreeMap<String, StateRecord>>,
}

impl MemoryStateStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with records.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = StateRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();
        Self {
            records: RwLock::new(map),
        }
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns true if the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, name: &str) -> StoreResult<Option<StateRecord>> {
        Ok(self.records.read().await.get(name).cloned())
    }

    async fn put(&self, record: &StateRecord) -> StoreResult<()> {
        self.records
            .write()
            .await
            .insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, name: &str) -> StoreResult<()> {
        self.records.write().await.remove(name);
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<StateRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
