//! Read-only allowance lookups

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use grantcraft_core::{Address, Amount};
use grantcraft_ledger::{Ledger, VerifiedEntry};
use grantcraft_store::RecordStore;

use crate::{CoordinatorError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRemaining {
    pub remaining_bytes: Amount,
    /// Last allocation to the subject currently bound to this address
    pub most_recent_allocation: Option<DateTime<Utc>>,
}

pub struct AllowanceQueries {
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn RecordStore>,
}

impl AllowanceQueries {
    pub fn new(ledger: Arc<dyn Ledger>, store: Arc<dyn RecordStore>) -> Self {
        Self { ledger, store }
    }

    /// Remaining DataCap of a client. An address that never had DataCap reads
    /// as zero.
    pub async fn account_remaining(&self, target: &str) -> Result<AccountRemaining> {
        let address = parse(target)?;
        let remaining_bytes = match self.ledger.read_capacity(&address).await {
            Ok(remaining) => remaining,
            Err(e) if e.is_not_found() => Amount::ZERO,
            Err(e) => return Err(e.into()),
        };
        let most_recent_allocation = self
            .store
            .find_by_verified_address(&address)
            .await?
            .map(|record| record.most_recent_allocation);

        Ok(AccountRemaining {
            remaining_bytes,
            most_recent_allocation,
        })
    }

    /// Remaining allowance of a verifier; not being a verifier is an error
    pub async fn verifier_remaining(&self, target: &str) -> Result<Amount> {
        let address = parse(target)?;
        Ok(self.ledger.read_verifier_capacity(&address).await?)
    }

    pub async fn verifiers(&self) -> Result<Vec<VerifiedEntry>> {
        Ok(self.ledger.list_verifiers().await?)
    }

    pub async fn verified_clients(&self) -> Result<Vec<VerifiedEntry>> {
        Ok(self.ledger.list_verified_clients().await?)
    }
}

fn parse(target: &str) -> Result<Address> {
    Address::parse(target.trim()).map_err(|e| CoordinatorError::Validation(e.to_string()))
}
