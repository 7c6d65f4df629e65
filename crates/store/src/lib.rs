//! GrantCraft Record Store
//!
//! Persistence for subject records behind the [`RecordStore`] trait.
//!
//! ## Contract
//!
//! - `get` returns the record or [`StoreError::NotFound`].
//! - `put` overwrites every field except the lock flags, which it leaves as
//!   stored. Lock flags change only through `conditional_set_flag`.
//! - `update` applies an edit to the stored record atomically, so fields
//!   written concurrently by other holders survive. The edit may run more
//!   than once and must not depend on anything but the record it is given.
//! - `conditional_set_flag` is a single atomic compare-and-swap on one flag.
//!   A missing record reads as "all flags false"; a successful write against
//!   a missing record creates it.
//!
//! ## Backends
//!
//! - [`MemoryStore`]: process-local map, for tests and mock deployments.
//! - [`SledStore`]: embedded on-disk tree using sled's native compare-and-swap.

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use async_trait::async_trait;
use grantcraft_core::{Address, LockName, Provider, SubjectId, SubjectRecord};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(SubjectId),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Outcome of a conditional flag write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagWrite {
    /// The flag held the expected value and now holds the new one
    Applied,
    /// The flag did not hold the expected value; nothing was written
    ConditionFailed,
}

/// Subject record persistence
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a record by subject
    async fn get(&self, id: &SubjectId) -> Result<SubjectRecord>;

    /// Write a record, keeping the stored lock flags
    async fn put(&self, record: &SubjectRecord) -> Result<()>;

    /// Apply `edit` to the stored record as one atomic step and return the
    /// result. Lock flags and the id are kept as stored; a missing record is
    /// [`StoreError::NotFound`].
    async fn update(
        &self,
        id: &SubjectId,
        edit: &(dyn for<'r> Fn(&'r mut SubjectRecord) + Send + Sync),
    ) -> Result<SubjectRecord>;

    /// Atomically set `lock` to `new_value` iff it currently equals `expected`
    async fn conditional_set_flag(
        &self,
        id: &SubjectId,
        lock: LockName,
        new_value: bool,
        expected: bool,
    ) -> Result<FlagWrite>;

    /// Find the record that linked `unique_id` through `provider`
    async fn find_by_account(
        &self,
        provider: Provider,
        unique_id: &str,
    ) -> Result<Option<SubjectRecord>>;

    /// Find the record whose verified address is `address`
    async fn find_by_verified_address(&self, address: &Address) -> Result<Option<SubjectRecord>>;
}

/// Apply a flag transition to an optional stored record.
///
/// Shared by the backends so both implement identical semantics.
pub(crate) fn transition_flag(
    stored: Option<SubjectRecord>,
    id: &SubjectId,
    lock: LockName,
    new_value: bool,
    expected: bool,
) -> Option<SubjectRecord> {
    let current = stored.as_ref().map(|r| r.is_locked(lock)).unwrap_or(false);
    if current != expected {
        return None;
    }
    let mut record = stored.unwrap_or_else(|| SubjectRecord::new(id.clone()));
    record.locks.insert(lock, new_value);
    Some(record)
}

/// Merge an incoming record with the stored one, keeping stored lock flags
pub(crate) fn merge_for_put(stored: Option<&SubjectRecord>, incoming: &SubjectRecord) -> SubjectRecord {
    let mut merged = incoming.clone();
    merged.locks = stored.map(|r| r.locks.clone()).unwrap_or_default();
    merged
}

/// Run `edit` on a copy of `stored`, restoring its id and lock flags
pub(crate) fn apply_edit(
    stored: &SubjectRecord,
    edit: &(dyn for<'r> Fn(&'r mut SubjectRecord) + Send + Sync),
) -> SubjectRecord {
    let mut record = stored.clone();
    edit(&mut record);
    record.id = stored.id.clone();
    record.locks = stored.locks.clone();
    record
}

pub(crate) fn matches_account(record: &SubjectRecord, provider: Provider, unique_id: &str) -> bool {
    record
        .accounts
        .get(&provider)
        .map(|account| account.unique_id == unique_id)
        .unwrap_or(false)
}
