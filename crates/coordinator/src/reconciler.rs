//! Settlement of submitted grants
//!
//! Each submitted message becomes a [`SettlementJob`] owning the lock its
//! request acquired. The job waits for the message's outcome under its own
//! deadline, writes the grant into the subject record on success, and then
//! releases the lock. The record write is an atomic store update touching only
//! the grant's own fields, so grants settling under different locks for the
//! same subject do not overwrite each other.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

use grantcraft_core::{Address, Amount, SubjectId, SubjectRecord, TxRef};
use grantcraft_ledger::{ExitCode, Ledger};
use grantcraft_store::RecordStore;

use crate::{HeldLock, RetryPolicy};

/// What a confirmed message grants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    /// DataCap credited to `address`
    Allocation { address: Address },
    /// Faucet payout to a miner; the message becomes the next power snapshot point
    MinerFaucet,
    /// One-time faucet payout to a non-miner
    NonMinerFaucet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Landed successfully and recorded
    Confirmed,
    /// Landed with a non-zero exit code; nothing recorded
    Failed(ExitCode),
    /// Outcome not observed before the deadline; nothing recorded
    TimedOut { last_error: Option<String> },
    /// Landed successfully but the record write failed
    PersistFailed(String),
}

/// Unit of settlement work
pub struct SettlementJob {
    pub subject: SubjectId,
    pub tx: TxRef,
    pub amount: Amount,
    pub grant: Grant,
    pub lock: HeldLock,
}

pub struct SettlementReconciler {
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn RecordStore>,
    retry: RetryPolicy,
    confidence: u64,
    timeout: Duration,
}

impl SettlementReconciler {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn RecordStore>,
        retry: RetryPolicy,
        confidence: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            store,
            retry,
            confidence,
            timeout,
        }
    }

    /// Settle `job` and release its lock
    pub async fn run(&self, job: SettlementJob) -> SettlementOutcome {
        let SettlementJob {
            subject,
            tx,
            amount,
            grant,
            lock,
        } = job;

        let outcome = self.settle(&subject, &tx, &grant).await;
        match &outcome {
            SettlementOutcome::Confirmed => {
                info!("Settled {} for {} ({:?}, {})", tx, subject, grant, amount)
            }
            SettlementOutcome::Failed(code) => {
                error!("{} for {} failed with exit code {}", tx, subject, code.0)
            }
            SettlementOutcome::TimedOut { last_error } => warn!(
                "{} for {} unconfirmed after {:?}: {}",
                tx,
                subject,
                self.timeout,
                last_error.as_deref().unwrap_or("no response")
            ),
            SettlementOutcome::PersistFailed(e) => {
                error!("{} for {} landed but was not recorded: {}", tx, subject, e)
            }
        }

        lock.release().await;
        outcome
    }

    async fn settle(&self, subject: &SubjectId, tx: &TxRef, grant: &Grant) -> SettlementOutcome {
        let deadline = Instant::now() + self.timeout;
        let wait = self.retry.retry_until(deadline, "settlement wait", || {
            self.ledger.await_result(tx, self.confidence)
        });

        let exit_code = match tokio::time::timeout_at(deadline, wait).await {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => {
                return SettlementOutcome::TimedOut {
                    last_error: Some(e.to_string()),
                }
            }
            Err(_) => return SettlementOutcome::TimedOut { last_error: None },
        };

        if !exit_code.is_success() {
            return SettlementOutcome::Failed(exit_code);
        }

        match self.record(subject, tx, grant).await {
            Ok(()) => SettlementOutcome::Confirmed,
            Err(e) => SettlementOutcome::PersistFailed(e.to_string()),
        }
    }

    async fn record(
        &self,
        subject: &SubjectId,
        tx: &TxRef,
        grant: &Grant,
    ) -> grantcraft_store::Result<()> {
        let confirmed_at = Utc::now();
        let edit = |record: &mut SubjectRecord| match grant {
            Grant::Allocation { address } => record.record_allocation(confirmed_at, address.clone()),
            Grant::MinerFaucet => record.record_miner_grant(confirmed_at, tx.clone()),
            Grant::NonMinerFaucet => record.record_non_miner_grant(),
        };
        self.store.update(subject, &edit).await?;
        Ok(())
    }
}

/// Resolves to the outcome of one submitted job
pub struct SettlementHandle {
    rx: oneshot::Receiver<SettlementOutcome>,
}

impl SettlementHandle {
    /// `None` if the job was aborted before finishing
    pub async fn outcome(self) -> Option<SettlementOutcome> {
        self.rx.await.ok()
    }
}

/// Runs settlement jobs detached from the requests that submitted them
pub struct SettlementExecutor {
    reconciler: Arc<SettlementReconciler>,
    tasks: Mutex<JoinSet<()>>,
}

impl SettlementExecutor {
    pub fn new(reconciler: SettlementReconciler) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub async fn submit(&self, job: SettlementJob) -> SettlementHandle {
        let (tx, rx) = oneshot::channel();
        let reconciler = self.reconciler.clone();

        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let outcome = reconciler.run(job).await;
            let _ = tx.send(outcome);
        });

        SettlementHandle { rx }
    }

    /// Jobs not yet finished
    pub async fn in_flight(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Wait for every submitted job; returns how many were waited on
    pub async fn drain(&self) -> usize {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
        let mut drained = 0;
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Settlement task failed: {}", e);
            }
            drained += 1;
        }
        if drained > 0 {
            info!("Drained {} settlement jobs", drained);
        }
        drained
    }
}
