//! Gas estimation and message submission
//!
//! Both estimates are retried until the caller's deadline. The push itself is
//! a single attempt: a failed push may or may not have reached the node, and
//! retrying it could pay twice.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::info;

use grantcraft_core::{Amount, TxRef};
use grantcraft_ledger::{Ledger, LedgerError, Message};

use crate::RetryPolicy;

pub struct ChainSubmitter {
    ledger: Arc<dyn Ledger>,
    retry: RetryPolicy,
    gas_multiple: u64,
}

impl ChainSubmitter {
    pub fn new(ledger: Arc<dyn Ledger>, retry: RetryPolicy, gas_multiple: u64) -> Self {
        Self {
            ledger,
            retry,
            gas_multiple,
        }
    }

    pub async fn estimate_gas_limit(
        &self,
        message: &Message,
        deadline: Instant,
    ) -> Result<i64, LedgerError> {
        self.retry
            .retry_until(deadline, "gas limit estimate", || {
                self.ledger.estimate_gas_limit(message)
            })
            .await
    }

    pub async fn estimate_gas_price(
        &self,
        message: &Message,
        deadline: Instant,
    ) -> Result<Amount, LedgerError> {
        self.retry
            .retry_until(deadline, "gas price estimate", || {
                self.ledger.estimate_gas_price(message)
            })
            .await
    }

    /// Fill in gas limit and price, each scaled by the safety multiple.
    /// The price is estimated for the already-scaled limit.
    pub async fn prepare(&self, mut message: Message, deadline: Instant) -> Result<Message, LedgerError> {
        let limit = self.estimate_gas_limit(&message, deadline).await?;
        message.gas_limit = limit.saturating_mul(self.gas_multiple as i64);

        let price = self.estimate_gas_price(&message, deadline).await?;
        message.gas_price = price.saturating_mul(self.gas_multiple);
        Ok(message)
    }

    /// Push `message` once; errors are returned untouched
    pub async fn submit(&self, message: &Message) -> Result<TxRef, LedgerError> {
        let tx = self.ledger.submit(message).await?;
        info!(
            "Submitted {} to {} as {} (gas limit {}, price {})",
            message.granted_amount(),
            message.to,
            tx,
            message.gas_limit,
            message.gas_price
        );
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grantcraft_core::Address;
    use grantcraft_ledger::LedgerClient;
    use std::time::Duration;

    fn message() -> Message {
        Message::transfer(
            Address::parse("f0100").unwrap(),
            Address::parse("f0200").unwrap(),
            Amount(10),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_scales_estimates() {
        let ledger = Arc::new(LedgerClient::mock());
        let submitter = ChainSubmitter::new(ledger, RetryPolicy::default(), 2);
        let deadline = Instant::now() + Duration::from_secs(60);

        let prepared = submitter.prepare(message(), deadline).await.unwrap();
        assert_eq!(prepared.gas_limit, 2_000_000);
        assert_eq!(prepared.gas_price, Amount(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_retries_estimates() {
        let ledger = Arc::new(LedgerClient::mock());
        ledger.fail_mock_estimates(3);
        let submitter = ChainSubmitter::new(ledger.clone(), RetryPolicy::default(), 1);
        let deadline = Instant::now() + Duration::from_secs(600);

        let prepared = submitter.prepare(message(), deadline).await.unwrap();
        assert_eq!(prepared.gas_limit, 1_000_000);
        assert_eq!(ledger.mock_estimate_calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_gives_up_at_deadline() {
        let ledger = Arc::new(LedgerClient::mock());
        ledger.fail_mock_estimates(u32::MAX);
        let submitter = ChainSubmitter::new(ledger, RetryPolicy::default(), 2);
        let deadline = Instant::now() + Duration::from_secs(30);

        let err = submitter.prepare(message(), deadline).await.unwrap_err();
        assert!(matches!(err, LedgerError::Transport(_)));
    }

    #[tokio::test]
    async fn test_submit_is_single_attempt() {
        let ledger = Arc::new(LedgerClient::mock());
        ledger.fail_mock_submit(Some("connection reset".to_string()));
        let submitter = ChainSubmitter::new(ledger.clone(), RetryPolicy::default(), 2);

        let err = submitter.submit(&message()).await.unwrap_err();
        assert_eq!(err, LedgerError::Transport("connection reset".to_string()));
        assert!(ledger.mock_submitted().is_empty());
    }
}
