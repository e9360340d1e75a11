//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.

use async_trait::async_trait;

use crate::error::StateError;

use super::record::StateRecord;

/// Result type for state store operations.
pub type StoreResult<T> = std::result::Result<T, StateError>;

/// Trait for per-resource state storage backends.
///
/// Every operation is scoped to a single logical name. Implementations
/// must serialize concurrent writes to the same name; writes to
/// different names may proceed concurrently.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the record for a logical name.
    ///
    /// Returns `None` if the resource has never been applied.
    async fn get(&self, name: &str) -> StoreResult<Option<StateRecord>>;

    /// Writes the record under its logical name, replacing any
    /// previous record.
    async fn put(&self, record: &StateRecord) -> StoreResult<()>;

    /// Removes the record for a logical name. Removing an absent
    /// record is not an error.
    async fn remove(&self, name: &str) -> StoreResult<()>;

    /// Lists all records, sorted by logical name.
    async fn list(&self) -> StoreResult<Vec<StateRecord>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn get(&self, name: &str) -> StoreResult<Option<StateRecord>> {
        (**self).get(name).await
    }

    async fn put(&self, record: &StateRecord) -> StoreResult<()> {
        (**self).put(record).await
    }

    async fn remove(&self, name: &str) -> StoreResult<()> {
        (**self).remove(name).await
    }

    async fn list(&self) -> StoreResult<Vec<StateRecord>> {
        (**self).list().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
