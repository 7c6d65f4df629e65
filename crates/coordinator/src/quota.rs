//! Grant sizing from ledger snapshots
//!
//! Every read here must happen after the caller acquired the lock for the
//! grant kind; the lock is what keeps two holders from quoting off the same
//! snapshot.

use std::sync::Arc;

use tracing::debug;

use grantcraft_core::{Address, Amount, SubjectRecord, TipSetKey, GIB};
use grantcraft_ledger::Ledger;
use grantcraft_settings::Settings;

use crate::{CoordinatorError, Result};

/// Grant for a repeat miner request, before clamping.
///
/// `floor(floor(delta / GiB) / 2)` when `prior` exceeds `current`, else zero.
pub fn power_delta_grant(prior: Amount, current: Amount) -> Amount {
    match prior.checked_sub(current) {
        Some(delta) => Amount(delta.value() / GIB / 2),
        None => Amount::ZERO,
    }
}

pub struct QuotaCalculator {
    ledger: Arc<dyn Ledger>,
    max_allowance: Amount,
    base_rate: Amount,
    min_grant: Amount,
}

impl QuotaCalculator {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        max_allowance: Amount,
        base_rate: Amount,
        min_grant: Amount,
    ) -> Self {
        Self {
            ledger,
            max_allowance,
            base_rate,
            min_grant,
        }
    }

    pub fn from_settings(ledger: Arc<dyn Ledger>, settings: &Settings) -> Self {
        Self::new(
            ledger,
            settings.verifier.max_allowance_bytes,
            settings.faucet.base_rate,
            settings.faucet.min_grant,
        )
    }

    /// Remaining DataCap of `target`; never having had any reads as zero
    pub async fn remaining_capacity(&self, target: &Address) -> Result<Amount> {
        match self.ledger.read_capacity(target).await {
            Ok(remaining) => Ok(remaining),
            Err(e) if e.is_not_found() => Ok(Amount::ZERO),
            Err(e) => Err(e.into()),
        }
    }

    /// DataCap needed to bring `target` up to the configured maximum
    pub async fn allocation_owed(&self, target: &Address) -> Result<Amount> {
        let remaining = self.remaining_capacity(target).await?;
        match self.max_allowance.checked_sub(remaining) {
            Some(owed) if !owed.is_zero() => {
                debug!("{} has {} remaining, owed {}", target, remaining, owed);
                Ok(owed)
            }
            _ => Err(CoordinatorError::NothingOwed {
                remaining,
                target: self.max_allowance,
            }),
        }
    }

    /// Faucet grant for `record`; `miner` is the target's miner ID, if any
    pub async fn faucet_grant(
        &self,
        record: &SubjectRecord,
        miner: Option<&Address>,
    ) -> Result<Amount> {
        let (miner, prior_tx) = match (miner, &record.most_recent_miner_faucet_grant_tx) {
            (Some(miner), Some(tx)) => (miner, tx),
            _ => return Ok(self.base_rate),
        };

        let prior_tip = self.ledger.tip_of(prior_tx).await?;
        let prior = self.ledger.read_power(miner, &prior_tip).await?;
        let current = self.ledger.read_power(miner, &TipSetKey::head()).await?;

        let grant = power_delta_grant(prior, current).max(self.min_grant);
        debug!(
            "Miner {} power {} -> {}, grant {}",
            miner, prior, current, grant
        );
        Ok(grant)
    }
}
