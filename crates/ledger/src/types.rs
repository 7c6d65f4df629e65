//! Ledger message and state types

use grantcraft_core::{Address, Amount};
use serde::{Deserialize, Serialize};

/// Actor ID of the verified registry
pub const VERIFIED_REGISTRY_ACTOR_ID: u64 = 6;

/// Method number of a plain value transfer
pub const METHOD_SEND: u64 = 0;

/// Verified registry method granting DataCap to a client
pub const METHOD_ADD_VERIFIED_CLIENT: u64 = 4;

/// What a message asks the receiving actor to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodCall {
    /// Transfer `value` to the receiver
    Send,
    /// Grant `allowance` bytes of DataCap to `client`
    AddVerifiedClient { client: Address, allowance: Amount },
}

impl MethodCall {
    pub fn method_number(&self) -> u64 {
        match self {
            MethodCall::Send => METHOD_SEND,
            MethodCall::AddVerifiedClient { .. } => METHOD_ADD_VERIFIED_CLIENT,
        }
    }
}

/// Unsigned ledger message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: Address,
    pub to: Address,
    pub value: Amount,
    pub call: MethodCall,
    /// Zero until estimated
    pub gas_limit: i64,
    /// Zero until estimated
    pub gas_price: Amount,
}

impl Message {
    /// Value transfer from `from` to `to`
    pub fn transfer(from: Address, to: Address, value: Amount) -> Self {
        Self {
            from,
            to,
            value,
            call: MethodCall::Send,
            gas_limit: 0,
            gas_price: Amount::ZERO,
        }
    }

    /// DataCap grant signed by `verifier`, addressed to the verified registry
    pub fn add_verified_client(verifier: Address, client: Address, allowance: Amount) -> Self {
        let registry = Address::new_id(verifier.network(), VERIFIED_REGISTRY_ACTOR_ID);
        Self {
            from: verifier,
            to: registry,
            value: Amount::ZERO,
            call: MethodCall::AddVerifiedClient { client, allowance },
            gas_limit: 0,
            gas_price: Amount::ZERO,
        }
    }

    /// Amount credited to the beneficiary: tokens for transfers, bytes for grants
    pub fn granted_amount(&self) -> Amount {
        match &self.call {
            MethodCall::Send => self.value,
            MethodCall::AddVerifiedClient { allowance, .. } => *allowance,
        }
    }
}

/// Receipt exit code of an executed message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExitCode(pub i64);

impl ExitCode {
    pub const OK: ExitCode = ExitCode(0);

    pub fn is_success(&self) -> bool {
        self.0 == 0
    }
}

/// Address with its remaining DataCap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedEntry {
    pub address: Address,
    pub data_cap: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_verified_client_targets_registry() {
        let verifier = Address::parse("t01001").unwrap();
        let client = Address::parse("t01002").unwrap();
        let msg = Message::add_verified_client(verifier, client.clone(), Amount(1024));

        assert_eq!(msg.to.to_string(), "t06");
        assert_eq!(msg.call.method_number(), METHOD_ADD_VERIFIED_CLIENT);
        assert_eq!(msg.value, Amount::ZERO);
        assert_eq!(msg.granted_amount(), Amount(1024));
    }

    #[test]
    fn test_transfer_defaults() {
        let from = Address::parse("f0100").unwrap();
        let to = Address::parse("f0200").unwrap();
        let msg = Message::transfer(from, to, Amount(5));

        assert_eq!(msg.call, MethodCall::Send);
        assert_eq!(msg.gas_limit, 0);
        assert_eq!(msg.gas_price, Amount::ZERO);
        assert_eq!(msg.granted_amount(), Amount(5));
    }

    #[test]
    fn test_exit_code() {
        assert!(ExitCode::OK.is_success());
        assert!(!ExitCode(16).is_success());
    }

    #[test]
    fn test_verified_entry_json_shape() {
        let entry = VerifiedEntry {
            address: Address::parse("f01234").unwrap(),
            data_cap: Amount(99),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["address"], "f01234");
        assert_eq!(json["dataCap"], "99");
    }
}
