//! In-memory record store

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use grantcraft_core::{Address, LockName, Provider, SubjectId, SubjectRecord};
use tracing::debug;

use crate::{
    apply_edit, matches_account, merge_for_put, transition_flag, FlagWrite, RecordStore, Result,
    StoreError,
};

/// Process-local store. Each operation runs under one write lock, which makes
/// `conditional_set_flag` atomic with respect to every other operation.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<SubjectId, SubjectRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, id: &SubjectId) -> Result<SubjectRecord> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn put(&self, record: &SubjectRecord) -> Result<()> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        let merged = merge_for_put(records.get(&record.id), record);
        records.insert(record.id.clone(), merged);
        Ok(())
    }

    async fn update(
        &self,
        id: &SubjectId,
        edit: &(dyn for<'r> Fn(&'r mut SubjectRecord) + Send + Sync),
    ) -> Result<SubjectRecord> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        let stored = records.get(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let updated = apply_edit(stored, edit);
        records.insert(id.clone(), updated.clone());
        Ok(updated)
    }

    async fn conditional_set_flag(
        &self,
        id: &SubjectId,
        lock: LockName,
        new_value: bool,
        expected: bool,
    ) -> Result<FlagWrite> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        match transition_flag(records.get(id).cloned(), id, lock, new_value, expected) {
            Some(updated) => {
                records.insert(id.clone(), updated);
                Ok(FlagWrite::Applied)
            }
            None => {
                debug!("Flag {} on {} is not {}", lock, id, expected);
                Ok(FlagWrite::ConditionFailed)
            }
        }
    }

    async fn find_by_account(
        &self,
        provider: Provider,
        unique_id: &str,
    ) -> Result<Option<SubjectRecord>> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records
            .values()
            .find(|r| matches_account(r, provider, unique_id))
            .cloned())
    }

    async fn find_by_verified_address(&self, address: &Address) -> Result<Option<SubjectRecord>> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records
            .values()
            .find(|r| r.verified_address.as_ref() == Some(address))
            .cloned())
    }
}
