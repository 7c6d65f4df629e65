//! Subject record
//!
//! The only mutable entity in the system. Lock flags are changed exclusively
//! through the record store's conditional write; every other field is updated
//! by whichever task currently holds the matching lock.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountData, Address, LockName, Provider, SubjectId, TxRef};

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRecord {
    pub id: SubjectId,

    /// Linked external accounts, at most one per provider
    #[serde(default)]
    pub accounts: BTreeMap<Provider, AccountData>,

    /// Lock flags; an absent entry reads as unlocked
    #[serde(default)]
    pub locks: BTreeMap<LockName, bool>,

    #[serde(default = "epoch")]
    pub most_recent_allocation: DateTime<Utc>,

    #[serde(default = "epoch")]
    pub most_recent_miner_faucet_grant: DateTime<Utc>,

    /// Power snapshot point for the next miner grant
    #[serde(default)]
    pub most_recent_miner_faucet_grant_tx: Option<TxRef>,

    /// Address most recently credited with DataCap
    #[serde(default)]
    pub verified_address: Option<Address>,

    #[serde(default)]
    pub received_non_miner_faucet_grant: bool,
}

impl SubjectRecord {
    pub fn new(id: SubjectId) -> Self {
        Self {
            id,
            accounts: BTreeMap::new(),
            locks: BTreeMap::new(),
            most_recent_allocation: epoch(),
            most_recent_miner_faucet_grant: epoch(),
            most_recent_miner_faucet_grant_tx: None,
            verified_address: None,
            received_non_miner_faucet_grant: false,
        }
    }

    pub fn is_locked(&self, lock: LockName) -> bool {
        self.locks.get(&lock).copied().unwrap_or(false)
    }

    pub fn link_account(&mut self, provider: Provider, account: AccountData) {
        self.accounts.insert(provider, account);
    }

    /// Age of the oldest linked account at `now`
    pub fn oldest_account_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.accounts
            .values()
            .map(|account| account.created_at)
            .min()
            .and_then(|created| (now - created).to_std().ok())
    }

    pub fn has_requested_from_faucet_as_miner(&self) -> bool {
        self.most_recent_miner_faucet_grant_tx.is_some()
    }

    /// Record a confirmed DataCap allocation to `address`
    pub fn record_allocation(&mut self, at: DateTime<Utc>, address: Address) {
        self.most_recent_allocation = self.most_recent_allocation.max(at);
        self.verified_address = Some(address);
    }

    /// Record a confirmed miner faucet grant; `tx` becomes the next power snapshot point
    pub fn record_miner_grant(&mut self, at: DateTime<Utc>, tx: TxRef) {
        self.most_recent_miner_faucet_grant = self.most_recent_miner_faucet_grant.max(at);
        self.most_recent_miner_faucet_grant_tx = Some(tx);
    }

    pub fn record_non_miner_grant(&mut self) {
        self.received_non_miner_faucet_grant = true;
    }
}
