//! Coordinator errors

use chrono::{DateTime, Utc};
use thiserror::Error;

use grantcraft_core::{Amount, LockName, SubjectId};
use grantcraft_ledger::LedgerError;
use grantcraft_store::StoreError;

/// Why a subject may not receive a grant right now
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Ineligibility {
    #[error("no linked account is at least {min_days} days old")]
    AccountTooNew { min_days: u64 },

    #[error("previous allocation is still in cooldown until {until}")]
    Cooldown { until: DateTime<Utc> },

    #[error("miner grants are rate limited until {until}")]
    RateLimited { until: DateTime<Utc> },

    #[error("non-miner faucet grant already received")]
    NonMinerAlreadyGranted,
}

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("A {0} request is already in progress")]
    Conflict(LockName),

    #[error("Not eligible: {0}")]
    Ineligible(#[from] Ineligibility),

    #[error("Nothing owed: remaining {remaining} already meets target {target}")]
    NothingOwed { remaining: Amount, target: Amount },

    #[error("Unknown subject: {0}")]
    UnknownSubject(SubjectId),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Timed out while {0}")]
    Timeout(&'static str),

    #[error("Request task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
