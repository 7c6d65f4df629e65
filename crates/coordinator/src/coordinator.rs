//! Per-request grant lifecycle
//!
//! ```text
//! Locking ──> Conflict
//!    │
//! Validating ──> Ineligible (release)
//!    │
//! Quoting ──> NothingOwed (release)
//!    │
//! Submitting ──> SubmitFailed / Timeout (release)
//!    │
//! Submitted ──> respond to caller
//!    │
//! Reconciling ──> Confirmed (record, release) | Unconfirmed (release)
//! ```
//!
//! The caller gets its transaction reference as soon as the message is
//! pushed. The lock travels with the settlement job and is released there.
//!
//! Everything after address parsing runs on its own task. A caller that stops
//! waiting does not cancel the request, so a pushed message always reaches
//! settlement with its lock.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::info;

use grantcraft_core::{Address, Amount, LockName, SubjectId, SubjectRecord, TxRef};
use grantcraft_ledger::{Ledger, Message};
use grantcraft_settings::Settings;
use grantcraft_store::{RecordStore, StoreError};

use crate::{
    ChainSubmitter, CoordinatorError, DistributedLock, EligibilityEvaluator, Grant, HeldLock,
    QuotaCalculator, Result, RetryPolicy, SettlementExecutor, SettlementHandle, SettlementJob,
    SettlementReconciler,
};

/// Lifecycle phase, used in logs and timeout errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Locking,
    Validating,
    Quoting,
    Submitting,
    Reconciling,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Locking => "locking",
            Phase::Validating => "validating",
            Phase::Quoting => "quoting",
            Phase::Submitting => "submitting",
            Phase::Reconciling => "reconciling",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addresses and deadlines the coordinator runs with
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub verifier_address: Address,
    /// Node default wallet when `None`
    pub faucet_address: Option<Address>,
    pub quote_deadline: Duration,
    pub submit_deadline: Duration,
}

impl CoordinatorConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let verifier_address = settings.verifier.verifier_address.clone().ok_or_else(|| {
            CoordinatorError::Validation("no verifier address configured".to_string())
        })?;
        Ok(Self {
            verifier_address,
            faucet_address: settings.faucet.faucet_address.clone(),
            quote_deadline: settings.timing.quote_deadline(),
            submit_deadline: settings.timing.submit_deadline(),
        })
    }
}

/// Result of an accepted allocation request
pub struct AllocationReceipt {
    pub tx: TxRef,
    pub allowance: Amount,
    pub settlement: SettlementHandle,
}

/// Result of an accepted faucet request
pub struct FaucetReceipt {
    pub tx: TxRef,
    pub sent: Amount,
    pub settlement: SettlementHandle,
}

struct Submitted {
    tx: TxRef,
    amount: Amount,
    grant: Grant,
}

pub struct RequestCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    config: CoordinatorConfig,
    store: Arc<dyn RecordStore>,
    ledger: Arc<dyn Ledger>,
    lock: DistributedLock,
    eligibility: EligibilityEvaluator,
    quota: QuotaCalculator,
    submitter: ChainSubmitter,
    executor: Arc<SettlementExecutor>,
}

impl RequestCoordinator {
    pub fn new(
        settings: &Settings,
        store: Arc<dyn RecordStore>,
        ledger: Arc<dyn Ledger>,
    ) -> Result<Self> {
        let config = CoordinatorConfig::from_settings(settings)?;
        let retry = RetryPolicy::from_settings(&settings.timing);
        let reconciler = SettlementReconciler::new(
            ledger.clone(),
            store.clone(),
            retry,
            settings.ledger.confidence,
            settings.timing.settlement_timeout(),
        );

        let inner = Inner {
            config,
            lock: DistributedLock::new(store.clone()),
            eligibility: EligibilityEvaluator::from_settings(settings),
            quota: QuotaCalculator::from_settings(ledger.clone(), settings),
            submitter: ChainSubmitter::new(ledger.clone(), retry, settings.gas.multiple),
            executor: Arc::new(SettlementExecutor::new(reconciler)),
            store,
            ledger,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn executor(&self) -> &Arc<SettlementExecutor> {
        &self.inner.executor
    }

    /// Top `target` up to the configured DataCap allowance
    pub async fn request_allocation(
        &self,
        subject: &SubjectId,
        target: &str,
    ) -> Result<AllocationReceipt> {
        let target = parse_target(target)?;
        let inner = self.inner.clone();
        let subject = subject.clone();
        detach(async move { inner.allocate(&subject, &target).await }).await
    }

    /// Pay a faucet grant to `target`, or to its miner ID if it is a miner
    pub async fn request_faucet(&self, subject: &SubjectId, target: &str) -> Result<FaucetReceipt> {
        let target = parse_target(target)?;
        let inner = self.inner.clone();
        let subject = subject.clone();
        detach(async move { inner.faucet(&subject, &target).await }).await
    }
}

impl Inner {
    async fn allocate(&self, subject: &SubjectId, target: &Address) -> Result<AllocationReceipt> {
        self.ensure_subject(subject).await?;

        self.log_phase(subject, Phase::Locking);
        let held = self.lock.acquire(subject, LockName::Verifier).await?;
        match self.allocate_locked(subject, target).await {
            Ok(submitted) => {
                let tx = submitted.tx.clone();
                let allowance = submitted.amount;
                let settlement = self.settle(subject, submitted, held).await;
                Ok(AllocationReceipt {
                    tx,
                    allowance,
                    settlement,
                })
            }
            Err(e) => {
                info!("Allocation for {} rejected: {}", subject, e);
                held.release().await;
                Err(e)
            }
        }
    }

    async fn faucet(&self, subject: &SubjectId, target: &Address) -> Result<FaucetReceipt> {
        let source = match &self.config.faucet_address {
            Some(address) => address.clone(),
            None => self.ledger.default_address().await?,
        };
        self.ensure_subject(subject).await?;

        self.log_phase(subject, Phase::Locking);
        let held = self.lock.acquire(subject, LockName::Faucet).await?;
        match self.faucet_locked(subject, source, target).await {
            Ok(submitted) => {
                let tx = submitted.tx.clone();
                let sent = submitted.amount;
                let settlement = self.settle(subject, submitted, held).await;
                Ok(FaucetReceipt {
                    tx,
                    sent,
                    settlement,
                })
            }
            Err(e) => {
                info!("Faucet request for {} rejected: {}", subject, e);
                held.release().await;
                Err(e)
            }
        }
    }

    async fn ensure_subject(&self, subject: &SubjectId) -> Result<()> {
        match self.store.get(subject).await {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound(_)) => Err(CoordinatorError::UnknownSubject(subject.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Fresh read under the lock
    async fn load_record(&self, subject: &SubjectId) -> Result<SubjectRecord> {
        self.log_phase(subject, Phase::Validating);
        Ok(self.store.get(subject).await?)
    }

    async fn allocate_locked(&self, subject: &SubjectId, target: &Address) -> Result<Submitted> {
        let record = self.load_record(subject).await?;
        self.eligibility.check_allocation(&record, Utc::now())?;

        self.log_phase(subject, Phase::Quoting);
        let owed = within(
            self.config.quote_deadline,
            Phase::Quoting,
            self.quota.allocation_owed(target),
        )
        .await?;

        let message =
            Message::add_verified_client(self.config.verifier_address.clone(), target.clone(), owed);
        let tx = self.push(subject, message).await?;
        Ok(Submitted {
            tx,
            amount: owed,
            grant: Grant::Allocation {
                address: target.clone(),
            },
        })
    }

    async fn faucet_locked(
        &self,
        subject: &SubjectId,
        source: Address,
        target: &Address,
    ) -> Result<Submitted> {
        let record = self.load_record(subject).await?;
        let now = Utc::now();
        self.eligibility.check_faucet_account(&record, now)?;

        let miner = within(self.config.quote_deadline, Phase::Validating, async {
            Ok::<_, CoordinatorError>(self.ledger.miner_id(target).await?)
        })
        .await?;
        self.eligibility
            .check_faucet_target(&record, miner.is_some(), now)?;

        self.log_phase(subject, Phase::Quoting);
        let grant = within(
            self.config.quote_deadline,
            Phase::Quoting,
            self.quota.faucet_grant(&record, miner.as_ref()),
        )
        .await?;
        if grant.is_zero() {
            return Err(CoordinatorError::NothingOwed {
                remaining: Amount::ZERO,
                target: Amount::ZERO,
            });
        }

        let (recipient, kind) = match miner {
            Some(id) => (id, Grant::MinerFaucet),
            None => (target.clone(), Grant::NonMinerFaucet),
        };
        let tx = self
            .push(subject, Message::transfer(source, recipient, grant))
            .await?;
        Ok(Submitted {
            tx,
            amount: grant,
            grant: kind,
        })
    }

    /// Estimate and push under the submit deadline
    async fn push(&self, subject: &SubjectId, message: Message) -> Result<TxRef> {
        self.log_phase(subject, Phase::Submitting);
        let deadline = Instant::now() + self.config.submit_deadline;
        let push = async {
            let message = self.submitter.prepare(message, deadline).await?;
            Ok::<TxRef, CoordinatorError>(self.submitter.submit(&message).await?)
        };
        match tokio::time::timeout_at(deadline, push).await {
            Ok(result) => result,
            Err(_) => Err(CoordinatorError::Timeout(Phase::Submitting.as_str())),
        }
    }

    async fn settle(&self, subject: &SubjectId, submitted: Submitted, lock: HeldLock) -> SettlementHandle {
        self.log_phase(subject, Phase::Reconciling);
        self.executor
            .submit(SettlementJob {
                subject: subject.clone(),
                tx: submitted.tx,
                amount: submitted.amount,
                grant: submitted.grant,
                lock,
            })
            .await
    }

    fn log_phase(&self, subject: &SubjectId, phase: Phase) {
        info!("[{}] {}", phase, subject);
    }
}

fn parse_target(target: &str) -> Result<Address> {
    Address::parse(target.trim()).map_err(|e| CoordinatorError::Validation(e.to_string()))
}

/// Run a request on its own task and wait for it
async fn detach<T, F>(fut: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    tokio::spawn(fut)
        .await
        .map_err(|e| CoordinatorError::TaskFailed(e.to_string()))?
}

async fn within<T, F>(limit: Duration, phase: Phase, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(CoordinatorError::Timeout(phase.as_str())))
}
