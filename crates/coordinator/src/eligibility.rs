//! Eligibility checks over account ages and grant timestamps

use std::time::Duration;

use chrono::{DateTime, Utc};

use grantcraft_core::SubjectRecord;
use grantcraft_settings::Settings;

use crate::Ineligibility;

/// True iff any linked account was created at least `min_age` before now
pub fn has_account_older_than(record: &SubjectRecord, min_age: Duration) -> bool {
    has_account_older_than_at(record, min_age, Utc::now())
}

pub fn has_account_older_than_at(
    record: &SubjectRecord,
    min_age: Duration,
    now: DateTime<Utc>,
) -> bool {
    record
        .oldest_account_age(now)
        .map(|age| age >= min_age)
        .unwrap_or(false)
}

/// True iff now is before `last_grant + cooldown`
pub fn is_within_cooldown(last_grant: DateTime<Utc>, cooldown: Duration) -> bool {
    is_within_cooldown_at(last_grant, cooldown, Utc::now())
}

pub fn is_within_cooldown_at(
    last_grant: DateTime<Utc>,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> bool {
    match cooldown_end(last_grant, cooldown) {
        Some(end) => now < end,
        None => true,
    }
}

fn cooldown_end(last_grant: DateTime<Utc>, cooldown: Duration) -> Option<DateTime<Utc>> {
    let cooldown = chrono::Duration::from_std(cooldown).ok()?;
    last_grant.checked_add_signed(cooldown)
}

/// Thresholds for both grant kinds
#[derive(Debug, Clone)]
pub struct EligibilityEvaluator {
    pub verifier_min_account_age: Duration,
    pub allocation_cooldown: Duration,
    pub faucet_min_account_age: Duration,
    pub miner_rate_limit: Duration,
}

impl EligibilityEvaluator {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            verifier_min_account_age: settings.verifier.min_account_age(),
            allocation_cooldown: settings.verifier.cooldown(),
            faucet_min_account_age: settings.faucet.min_account_age(),
            miner_rate_limit: settings.faucet.rate_limit(),
        }
    }

    pub fn check_allocation(
        &self,
        record: &SubjectRecord,
        now: DateTime<Utc>,
    ) -> Result<(), Ineligibility> {
        if !has_account_older_than_at(record, self.verifier_min_account_age, now) {
            return Err(Ineligibility::AccountTooNew {
                min_days: whole_days(self.verifier_min_account_age),
            });
        }
        if is_within_cooldown_at(record.most_recent_allocation, self.allocation_cooldown, now) {
            return Err(Ineligibility::Cooldown {
                until: cooldown_end(record.most_recent_allocation, self.allocation_cooldown)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            });
        }
        Ok(())
    }

    /// Age check for any faucet request
    pub fn check_faucet_account(
        &self,
        record: &SubjectRecord,
        now: DateTime<Utc>,
    ) -> Result<(), Ineligibility> {
        if !has_account_older_than_at(record, self.faucet_min_account_age, now) {
            return Err(Ineligibility::AccountTooNew {
                min_days: whole_days(self.faucet_min_account_age),
            });
        }
        Ok(())
    }

    /// Target-dependent faucet rules; run once the target is known to be a miner or not
    pub fn check_faucet_target(
        &self,
        record: &SubjectRecord,
        is_miner: bool,
        now: DateTime<Utc>,
    ) -> Result<(), Ineligibility> {
        if !is_miner {
            if record.received_non_miner_faucet_grant {
                return Err(Ineligibility::NonMinerAlreadyGranted);
            }
            return Ok(());
        }

        if record.has_requested_from_faucet_as_miner()
            && is_within_cooldown_at(record.most_recent_miner_faucet_grant, self.miner_rate_limit, now)
        {
            return Err(Ineligibility::RateLimited {
                until: cooldown_end(record.most_recent_miner_faucet_grant, self.miner_rate_limit)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            });
        }
        Ok(())
    }
}

fn whole_days(duration: Duration) -> u64 {
    duration.as_secs() / (24 * 60 * 60)
}
