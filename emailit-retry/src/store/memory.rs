use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};

use super::{Result, RetryStore};
use crate::{
    error::StoreError,
    types::{RetryId, RetryRecord},
};

/// In-memory retry store
///
/// Records live in a `DashMap` keyed by id. Intended for tests and for hosts
/// that accept losing pending retries on restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryRetryStore {
    records: Arc<DashMap<RetryId, RetryRecord>>,
}

impl MemoryRetryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RetryStore for MemoryRetryStore {
    async fn insert(&self, record: &RetryRecord) -> Result<()> {
        match self.records.entry(record.id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(record.id)),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: &RetryId) -> Result<Option<RetryRecord>> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }

    async fn update(&self, record: &RetryRecord) -> Result<()> {
        self.records.get_mut(&record.id).map_or(
            Err(StoreError::NotFound(record.id)),
            |mut entry| {
                *entry.value_mut() = record.clone();
                Ok(())
            },
        )
    }

    async fn list(&self) -> Result<Vec<RetryRecord>> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        // ULIDs are lexicographically sortable by creation time
        records.sort_by_key(|record| record.id);

        Ok(records)
    }

    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let before = self.records.len();
        self.records.retain(|_, record| {
            !(record.status.is_terminal()
                && record.completed_at.is_some_and(|completed| completed < cutoff))
        });
        Ok(before.saturating_sub(self.records.len()))
    }
}
