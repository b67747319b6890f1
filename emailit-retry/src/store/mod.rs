//! Persistence for retry records.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryRetryStore;

use crate::{
    error::StoreError,
    types::{RetryId, RetryRecord, RetryStats},
};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Backing store for retry records.
///
/// Implementations map onto a relational table keyed by `retry_id`; every
/// method corresponds to a single parameterised statement.
#[async_trait]
pub trait RetryStore: Send + Sync + std::fmt::Debug {
    /// Persist a new record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if the id is taken.
    async fn insert(&self, record: &RetryRecord) -> Result<()>;

    /// Load a record by id, `None` if it does not exist.
    async fn get(&self, id: &RetryId) -> Result<Option<RetryRecord>>;

    /// Overwrite an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the record does not exist.
    async fn update(&self, record: &RetryRecord) -> Result<()>;

    /// All records, oldest first.
    async fn list(&self) -> Result<Vec<RetryRecord>>;

    /// Delete terminal records completed before `cutoff`, returning how many went.
    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Record counts per status.
    async fn stats(&self) -> Result<RetryStats> {
        let mut stats = RetryStats::default();
        for record in self.list().await? {
            stats.count(record.status);
        }
        Ok(stats)
    }
}
