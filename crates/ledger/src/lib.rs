//! GrantCraft Ledger
//!
//! Client for the external ledger that holds DataCap allowances, miner power
//! and faucet funds.
//!
//! ## Grant Flow
//!
//! 1. **Estimate**: gas limit, then gas price for that limit.
//! 2. **Submit**: push the message to the node's message pool. The returned
//!    transaction reference is content-addressed and usable for later lookups.
//! 3. **Await**: wait until the message lands with the requested confidence
//!    and read its exit code.
//!
//! Reads (`read_capacity`, `read_power`, ...) are point-in-time snapshots of
//! chain state; callers decide which tipset they want via [`TipSetKey`].

mod client;
mod hamt;
mod params;
mod rpc;
mod types;

pub use client::{LedgerClient, LedgerConfig, LedgerMode};
pub use types::*;

use async_trait::async_trait;
use grantcraft_core::{Address, Amount, TipSetKey, TxRef};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("RPC error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl LedgerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Operations the grant workflow needs from the ledger.
///
/// Implementations must not retry internally; retry and deadlines belong to
/// the caller.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Estimate the gas limit for `message`
    async fn estimate_gas_limit(&self, message: &Message) -> Result<i64>;

    /// Estimate the gas price for `message` at its current gas limit
    async fn estimate_gas_price(&self, message: &Message) -> Result<Amount>;

    /// Push a message; single attempt
    async fn submit(&self, message: &Message) -> Result<TxRef>;

    /// Wait for `tx` to land with `confidence` confirmations and return its exit code
    async fn await_result(&self, tx: &TxRef, confidence: u64) -> Result<ExitCode>;

    /// Remaining DataCap of a verified client; `NotFound` if it never had any
    async fn read_capacity(&self, address: &Address) -> Result<Amount>;

    /// Remaining allowance of a verifier; `NotFound` if not a verifier
    async fn read_verifier_capacity(&self, address: &Address) -> Result<Amount>;

    /// Raw byte power of `miner` at `tip`
    async fn read_power(&self, miner: &Address, tip: &TipSetKey) -> Result<Amount>;

    /// Tipset in which `tx` was included
    async fn tip_of(&self, tx: &TxRef) -> Result<TipSetKey>;

    /// ID address of `address` if it is a storage miner, `None` otherwise
    async fn miner_id(&self, address: &Address) -> Result<Option<Address>>;

    /// Default wallet address of the node
    async fn default_address(&self) -> Result<Address>;

    async fn list_verifiers(&self) -> Result<Vec<VerifiedEntry>>;

    async fn list_verified_clients(&self) -> Result<Vec<VerifiedEntry>>;

    /// Short label for logs and health output
    fn mode_name(&self) -> &'static str;
}
