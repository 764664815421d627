use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{InstallationStore, Mutation, StoreError};
use crate::models::installation::Installation;

/// In-memory store keyed by installation id.
///
/// DashMap shards its locks, so different installations never contend and
/// `update` holds the entry lock for exactly one record.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<String, Installation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = Installation>) -> Self {
        let store = Self::new();
        for inst in records {
            store.records.insert(inst.id.clone(), inst);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn snapshot(&self) -> Vec<Installation> {
        self.records.iter().map(|e| e.value().clone()).collect()
    }
}

#[async_trait]
impl InstallationStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Installation, StoreError> {
        self.records
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn put(&self, installation: Installation) -> Result<(), StoreError> {
        self.records.insert(installation.id.clone(), installation);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Installation>, StoreError> {
        Ok(self.snapshot())
    }

    async fn update(&self, id: &str, mutation: Mutation<'_>) -> Result<Installation, StoreError> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        mutation(entry.value_mut());
        // the record id is immutable
        entry.value_mut().id = id.to_string();
        Ok(entry.value().clone())
    }
}
