//! Linking provider accounts to subjects

use std::sync::Arc;

use tracing::info;

use grantcraft_core::{AccountData, Provider, SubjectId, SubjectRecord};
use grantcraft_store::RecordStore;

use crate::{CoordinatorError, Result};

pub struct AccountLinker {
    store: Arc<dyn RecordStore>,
}

impl AccountLinker {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Attach `account` to the subject that already owns it, or to a new
    /// subject. Refreshes the stored username and creation time.
    pub async fn link(&self, provider: Provider, account: AccountData) -> Result<SubjectRecord> {
        if account.unique_id.trim().is_empty() {
            return Err(CoordinatorError::Validation(
                "account id must not be empty".to_string(),
            ));
        }

        if let Some(existing) = self.store.find_by_account(provider, &account.unique_id).await? {
            let edit = |record: &mut SubjectRecord| record.link_account(provider, account.clone());
            return Ok(self.store.update(&existing.id, &edit).await?);
        }

        let mut record = SubjectRecord::new(SubjectId::generate());
        info!("Creating subject {} for {} account {}", record.id, provider, account.username);
        record.link_account(provider, account);
        self.store.put(&record).await?;
        Ok(record)
    }
}
