//! GrantCraft Coordinator
//!
//! Serializes DataCap allocation and faucet requests per subject:
//!
//! - `DistributedLock`: per-subject, per-operation locks held in the record store
//! - `EligibilityEvaluator`: account age, cooldown and faucet rate limits
//! - `QuotaCalculator`: how much a subject is owed
//! - `ChainSubmitter`: gas estimation and single-attempt message push
//! - `SettlementReconciler`: waits for the receipt, records the grant, releases the lock
//! - `RequestCoordinator`: drives a request through all of the above

mod accounts;
mod coordinator;
mod eligibility;
mod error;
mod lock;
mod queries;
mod quota;
mod reconciler;
mod retry;
mod submitter;

#[cfg(test)]
mod testing;

pub use accounts::AccountLinker;
pub use coordinator::{AllocationReceipt, CoordinatorConfig, FaucetReceipt, Phase, RequestCoordinator};
pub use eligibility::{
    has_account_older_than, has_account_older_than_at, is_within_cooldown, is_within_cooldown_at,
    EligibilityEvaluator,
};
pub use error::{CoordinatorError, Ineligibility, Result};
pub use lock::{DistributedLock, HeldLock, Release};
pub use queries::{AccountRemaining, AllowanceQueries};
pub use quota::{power_delta_grant, QuotaCalculator};
pub use reconciler::{
    Grant, SettlementExecutor, SettlementHandle, SettlementJob, SettlementOutcome,
    SettlementReconciler,
};
pub use retry::RetryPolicy;
pub use submitter::ChainSubmitter;
