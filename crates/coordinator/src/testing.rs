//! Test helpers

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use grantcraft_core::{
    AccountData, Address, Amount, LockName, Provider, SubjectId, SubjectRecord, TipSetKey, TxRef,
};
use grantcraft_ledger::{ExitCode, Ledger, LedgerClient, Message, VerifiedEntry};
use grantcraft_store::{FlagWrite, MemoryStore, RecordStore, Result, StoreError};

/// Store wrapper that counts release attempts per (subject, lock)
pub struct CountingStore {
    inner: MemoryStore,
    releases: Mutex<HashMap<(SubjectId, LockName), usize>>,
    fail_puts: AtomicBool,
    read_delay: Mutex<Duration>,
}

impl CountingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            releases: Mutex::new(HashMap::new()),
            fail_puts: AtomicBool::new(false),
            read_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Make every `put` and `update` fail until switched off
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Hold each `get` and `find_by_account` result for `delay` before returning it
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = delay;
    }

    async fn hold_read(&self) {
        let delay = *self.read_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_writes(&self) -> Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected put failure".to_string()));
        }
        Ok(())
    }

    pub fn releases(&self, subject: &SubjectId, lock: LockName) -> usize {
        self.releases
            .lock()
            .unwrap()
            .get(&(subject.clone(), lock))
            .copied()
            .unwrap_or(0)
    }

    pub async fn wait_for_releases(&self, subject: &SubjectId, lock: LockName, count: usize) {
        for _ in 0..1000 {
            if self.releases(subject, lock) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("timed out waiting for {count} releases of {lock} for {subject}");
    }
}

#[async_trait]
impl RecordStore for CountingStore {
    async fn get(&self, id: &SubjectId) -> Result<SubjectRecord> {
        let record = self.inner.get(id).await;
        self.hold_read().await;
        record
    }

    async fn put(&self, record: &SubjectRecord) -> Result<()> {
        self.check_writes()?;
        self.inner.put(record).await
    }

    async fn update(
        &self,
        id: &SubjectId,
        edit: &(dyn for<'r> Fn(&'r mut SubjectRecord) + Send + Sync),
    ) -> Result<SubjectRecord> {
        self.check_writes()?;
        self.inner.update(id, edit).await
    }

    async fn conditional_set_flag(
        &self,
        id: &SubjectId,
        lock: LockName,
        new_value: bool,
        expected: bool,
    ) -> Result<FlagWrite> {
        let result = self.inner.conditional_set_flag(id, lock, new_value, expected).await;
        if !new_value {
            *self
                .releases
                .lock()
                .unwrap()
                .entry((id.clone(), lock))
                .or_default() += 1;
        }
        result
    }

    async fn find_by_account(
        &self,
        provider: Provider,
        unique_id: &str,
    ) -> Result<Option<SubjectRecord>> {
        let record = self.inner.find_by_account(provider, unique_id).await;
        self.hold_read().await;
        record
    }

    async fn find_by_verified_address(&self, address: &Address) -> Result<Option<SubjectRecord>> {
        self.inner.find_by_verified_address(address).await
    }
}

/// Stored subject with one GitHub account created `account_age_days` ago
pub async fn seed_subject(store: &dyn RecordStore, id: &str, account_age_days: i64) -> SubjectId {
    let subject = SubjectId::new(id);
    let mut record = SubjectRecord::new(subject.clone());
    record.link_account(
        Provider::GitHub,
        AccountData {
            unique_id: format!("gh-{id}"),
            username: id.to_string(),
            created_at: Utc::now() - chrono::Duration::days(account_age_days),
        },
    );
    store.put(&record).await.unwrap();
    subject
}

/// Ledger whose `submit` pushes at once but takes `delay` to report back
pub struct SlowSubmitLedger {
    inner: Arc<LedgerClient>,
    delay: Duration,
}

impl SlowSubmitLedger {
    pub fn new(inner: Arc<LedgerClient>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl Ledger for SlowSubmitLedger {
    async fn estimate_gas_limit(&self, message: &Message) -> grantcraft_ledger::Result<i64> {
        self.inner.estimate_gas_limit(message).await
    }

    async fn estimate_gas_price(&self, message: &Message) -> grantcraft_ledger::Result<Amount> {
        self.inner.estimate_gas_price(message).await
    }

    async fn submit(&self, message: &Message) -> grantcraft_ledger::Result<TxRef> {
        let tx = self.inner.submit(message).await;
        tokio::time::sleep(self.delay).await;
        tx
    }

    async fn await_result(&self, tx: &TxRef, confidence: u64) -> grantcraft_ledger::Result<ExitCode> {
        self.inner.await_result(tx, confidence).await
    }

    async fn read_capacity(&self, address: &Address) -> grantcraft_ledger::Result<Amount> {
        self.inner.read_capacity(address).await
    }

    async fn read_verifier_capacity(&self, address: &Address) -> grantcraft_ledger::Result<Amount> {
        self.inner.read_verifier_capacity(address).await
    }

    async fn read_power(&self, miner: &Address, tip: &TipSetKey) -> grantcraft_ledger::Result<Amount> {
        self.inner.read_power(miner, tip).await
    }

    async fn tip_of(&self, tx: &TxRef) -> grantcraft_ledger::Result<TipSetKey> {
        self.inner.tip_of(tx).await
    }

    async fn miner_id(&self, address: &Address) -> grantcraft_ledger::Result<Option<Address>> {
        self.inner.miner_id(address).await
    }

    async fn default_address(&self) -> grantcraft_ledger::Result<Address> {
        self.inner.default_address().await
    }

    async fn list_verifiers(&self) -> grantcraft_ledger::Result<Vec<VerifiedEntry>> {
        self.inner.list_verifiers().await
    }

    async fn list_verified_clients(&self) -> grantcraft_ledger::Result<Vec<VerifiedEntry>> {
        self.inner.list_verified_clients().await
    }

    fn mode_name(&self) -> &'static str {
        self.inner.mode_name()
    }
}
