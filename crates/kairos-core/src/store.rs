//! Store - Durable instance configuration
//!
//! The pool never owns configuration; it asks the store whenever a Cold
//! instance is accessed or an instance is reloaded.

use crate::error::Result;
use crate::instance::{InstanceKey, InstanceRecord};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Source of instance records
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait InstanceStore: Send + Sync {
    /// Record for `key`, `None` when unknown
    async fn get(&self, key: &InstanceKey) -> Result<Option<InstanceRecord>>;

    /// Every known key
    async fn list(&self) -> Result<Vec<InstanceKey>>;
}

/// In-memory store, seeded from configuration
#[derive(Debug, Default)]
pub struct InMemoryInstanceStore {
    records: RwLock<BTreeMap<InstanceKey, InstanceRecord>>,
}

impl InMemoryInstanceStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `records`
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = InstanceRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.upsert(record);
        }
        store
    }

    /// Insert or replace a record; returns the previous one
    pub fn upsert(&self, record: InstanceRecord) -> Option<InstanceRecord> {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.key(), record)
    }

    /// Remove a record
    pub fn remove(&self, key: &InstanceKey) -> Option<InstanceRecord> {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn get(&self, key: &InstanceKey) -> Result<Option<InstanceRecord>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<InstanceKey>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect())
    }
}
