//! Ledger client for interacting with a Lotus-compatible node
//!
//! Supports two modes:
//! - **Mock Mode**: For development/testing without a node. State is tracked
//!   in-memory and messages execute as soon as they are submitted.
//! - **Live Mode**: JSON-RPC calls to a running node.
//!
//! Mock state can be scripted (failing estimates, failing submits, pending
//! messages, non-zero exit codes) so callers can drive every failure path.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use grantcraft_core::{Address, Amount, TipSetKey, TxRef};

use crate::hamt::{self, RegistryTable, VERIFIED_REGISTRY_ACTOR};
use crate::rpc::{self, LotusRpc};
use crate::{ExitCode, Ledger, LedgerError, Message, MethodCall, Result, VerifiedEntry};

/// Gas limit reported by the mock estimator
const MOCK_GAS_LIMIT: i64 = 1_000_000;

/// Gas price reported by the mock estimator
const MOCK_GAS_PRICE: u128 = 100;

/// Ledger mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LedgerMode {
    /// In-memory ledger for development and tests
    #[default]
    Mock,
    /// Lotus JSON-RPC node
    Live,
}

impl LedgerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerMode::Mock => "mock",
            LedgerMode::Live => "live",
        }
    }
}

/// Ledger client configuration
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Ledger mode (Mock or Live)
    pub mode: LedgerMode,
    /// JSON-RPC endpoint (only used in Live mode)
    pub rpc_url: String,
    /// Bearer token for the node API
    pub api_token: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            mode: LedgerMode::Mock,
            rpc_url: "http://127.0.0.1:1234/rpc/v0".to_string(),
            api_token: None,
        }
    }
}

impl LedgerConfig {
    /// Create mock mode config
    pub fn mock() -> Self {
        Self::default()
    }

    /// Create live mode config for the node at `rpc_url`
    pub fn live(rpc_url: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            mode: LedgerMode::Live,
            rpc_url: rpc_url.into(),
            api_token,
        }
    }
}

#[derive(Debug, Clone)]
struct MockMessage {
    message: Message,
    height: u64,
    exit_code: ExitCode,
}

/// In-memory state for mock mode
#[derive(Debug, Default)]
struct MockState {
    /// Current chain height; every submitted message lands in a new tipset
    height: u64,
    messages: HashMap<TxRef, MockMessage>,
    /// Submission order, for inspection by tests
    submitted: Vec<TxRef>,
    verifiers: BTreeMap<Address, Amount>,
    verified_clients: BTreeMap<Address, Amount>,
    balances: HashMap<Address, Amount>,
    /// Robust or ID address -> miner ID address
    miners: HashMap<Address, Address>,
    /// Miner ID address -> (height, raw byte power), ascending by height
    power_history: HashMap<Address, Vec<(u64, Amount)>>,
    default_address: Option<Address>,
    /// Remaining estimate calls that fail before succeeding
    failing_estimates: u32,
    estimate_calls: u64,
    submit_failure: Option<String>,
    next_exit_code: ExitCode,
    pending: bool,
}

impl MockState {
    fn tip_at(height: u64) -> TipSetKey {
        TipSetKey(vec![format!("mock-tipset-{}", height)])
    }

    fn height_of(tip: &TipSetKey) -> Option<u64> {
        tip.0
            .first()?
            .strip_prefix("mock-tipset-")?
            .parse()
            .ok()
    }

    /// Generate mock CID (when already holding lock)
    fn next_cid(&self) -> TxRef {
        TxRef::new(format!("bafy2bzacemock{:016x}", self.submitted.len() as u64 + 1))
    }

    fn take_estimate_failure(&mut self) -> Option<LedgerError> {
        self.estimate_calls += 1;
        if self.failing_estimates > 0 {
            self.failing_estimates -= 1;
            return Some(LedgerError::Transport("mock estimate unavailable".to_string()));
        }
        None
    }

    fn apply(&mut self, message: &Message) {
        match &message.call {
            MethodCall::Send => {
                let balance = self.balances.entry(message.to.clone()).or_default();
                *balance = Amount(balance.0.saturating_add(message.value.0));
            }
            MethodCall::AddVerifiedClient { client, allowance } => {
                if let Some(cap) = self.verifiers.get_mut(&message.from) {
                    *cap = Amount(cap.0.saturating_sub(allowance.0));
                }
                let cap = self.verified_clients.entry(client.clone()).or_default();
                *cap = Amount(cap.0.saturating_add(allowance.0));
            }
        }
    }
}

/// Ledger client
///
/// Share it behind an `Arc`; the mock scripting methods take `&self`.
pub struct LedgerClient {
    config: LedgerConfig,
    /// JSON-RPC transport (only used in Live mode)
    rpc: Option<LotusRpc>,
    /// Mock state (only used in Mock mode)
    mock_state: Arc<RwLock<MockState>>,
}

impl LedgerClient {
    pub fn new(config: LedgerConfig) -> Self {
        let rpc = match config.mode {
            LedgerMode::Live => Some(LotusRpc::new(
                config.rpc_url.clone(),
                config.api_token.clone(),
            )),
            LedgerMode::Mock => None,
        };

        Self {
            config,
            rpc,
            mock_state: Arc::new(RwLock::new(MockState::default())),
        }
    }

    /// Mock client with empty state
    pub fn mock() -> Self {
        Self::new(LedgerConfig::mock())
    }

    /// Check if running in mock mode
    pub fn is_mock(&self) -> bool {
        self.config.mode == LedgerMode::Mock
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn rpc(&self) -> Result<&LotusRpc> {
        self.rpc
            .as_ref()
            .ok_or_else(|| LedgerError::Transport("RPC client not initialized".to_string()))
    }

    /// Walk one of the registry actor's tables at the chain head
    async fn list_registry(&self, table: RegistryTable) -> Result<Vec<VerifiedEntry>> {
        let rpc = self.rpc()?;
        let actor: rpc::ActorJson = rpc
            .call(
                "Filecoin.StateGetActor",
                json!([VERIFIED_REGISTRY_ACTOR, Value::Null]),
            )
            .await?;
        hamt::list_table(rpc, &actor.head.cid, table).await
    }

    fn state(&self) -> RwLockReadGuard<'_, MockState> {
        self.mock_state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, MockState> {
        self.mock_state.write().unwrap_or_else(|e| e.into_inner())
    }

    // ==================== Mock scripting ====================

    /// Register a verifier with `allowance` bytes left to grant
    pub fn add_mock_verifier(&self, verifier: Address, allowance: Amount) {
        info!("[MOCK] Added verifier {} (allowance: {})", verifier, allowance);
        self.state_mut().verifiers.insert(verifier, allowance);
    }

    /// Set the remaining DataCap of a verified client
    pub fn set_mock_capacity(&self, client: Address, data_cap: Amount) {
        info!("[MOCK] DataCap of {} set to {}", client, data_cap);
        self.state_mut().verified_clients.insert(client, data_cap);
    }

    /// Register a storage miner; both `address` and `id` resolve to `id`
    pub fn add_mock_miner(&self, address: Address, id: Address) {
        info!("[MOCK] Added miner {} ({})", address, id);
        let mut state = self.state_mut();
        state.miners.insert(address, id.clone());
        state.miners.insert(id.clone(), id);
    }

    /// Record a new power reading for `miner` in a fresh tipset
    pub fn set_mock_power(&self, miner: &Address, power: Amount) {
        let mut state = self.state_mut();
        state.height += 1;
        let height = state.height;
        let id = state.miners.get(miner).cloned().unwrap_or_else(|| miner.clone());
        state.power_history.entry(id).or_default().push((height, power));
        info!("[MOCK] Power of {} at height {}: {}", miner, height, power);
    }

    pub fn set_mock_default_address(&self, address: Address) {
        self.state_mut().default_address = Some(address);
    }

    /// Fail the next `count` gas estimate calls with a transport error
    pub fn fail_mock_estimates(&self, count: u32) {
        self.state_mut().failing_estimates = count;
    }

    /// Fail every submit with `reason` until cleared with `None`
    pub fn fail_mock_submit(&self, reason: Option<String>) {
        self.state_mut().submit_failure = reason;
    }

    /// Exit code given to messages submitted from now on; non-zero codes
    /// leave ledger state untouched
    pub fn set_mock_exit_code(&self, exit_code: ExitCode) {
        self.state_mut().next_exit_code = exit_code;
    }

    /// While pending, `await_result` reports that no message has landed yet
    pub fn set_mock_pending(&self, pending: bool) {
        self.state_mut().pending = pending;
    }

    /// Messages submitted so far, oldest first
    pub fn mock_submitted(&self) -> Vec<(TxRef, Message)> {
        let state = self.state();
        state
            .submitted
            .iter()
            .filter_map(|tx| state.messages.get(tx).map(|m| (tx.clone(), m.message.clone())))
            .collect()
    }

    /// Number of gas estimate calls made, successful or not
    pub fn mock_estimate_calls(&self) -> u64 {
        self.state().estimate_calls
    }

    pub fn mock_balance(&self, address: &Address) -> Amount {
        self.state().balances.get(address).copied().unwrap_or_default()
    }

    pub fn mock_height(&self) -> u64 {
        self.state().height
    }
}

#[async_trait]
impl Ledger for LedgerClient {
    async fn estimate_gas_limit(&self, message: &Message) -> Result<i64> {
        if self.is_mock() {
            if let Some(err) = self.state_mut().take_estimate_failure() {
                return Err(err);
            }
            debug!("[MOCK] Gas limit for {} -> {}: {}", message.from, message.to, MOCK_GAS_LIMIT);
            return Ok(MOCK_GAS_LIMIT);
        }

        self.rpc()?
            .call(
                "Filecoin.GasEstimateGasLimit",
                json!([rpc::message_json(message)?, Value::Null]),
            )
            .await
    }

    async fn estimate_gas_price(&self, message: &Message) -> Result<Amount> {
        if self.is_mock() {
            if let Some(err) = self.state_mut().take_estimate_failure() {
                return Err(err);
            }
            return Ok(Amount(MOCK_GAS_PRICE));
        }

        self.rpc()?
            .call(
                "Filecoin.GasEstimateGasPrice",
                json!([0, message.from.to_string(), message.gas_limit, Value::Null]),
            )
            .await
    }

    async fn submit(&self, message: &Message) -> Result<TxRef> {
        info!(
            "Submitting method {} from {} to {} (amount: {})",
            message.call.method_number(),
            message.from,
            message.to,
            message.granted_amount(),
        );

        if self.is_mock() {
            let mut state = self.state_mut();
            if let Some(reason) = state.submit_failure.clone() {
                return Err(LedgerError::Transport(reason));
            }

            let tx = state.next_cid();
            state.height += 1;
            let exit_code = state.next_exit_code;
            if exit_code.is_success() {
                state.apply(message);
            }
            let landed = MockMessage {
                message: message.clone(),
                height: state.height,
                exit_code,
            };
            state.messages.insert(tx.clone(), landed);
            state.submitted.push(tx.clone());

            info!("[MOCK] Message {} landed at height {}", tx, state.height);
            return Ok(tx);
        }

        let signed: rpc::SignedMessageJson = self
            .rpc()?
            .call(
                "Filecoin.MpoolPushMessage",
                json!([rpc::message_json(message)?, Value::Null]),
            )
            .await?;
        let tx = TxRef::new(signed.cid.cid);
        info!("Message pushed: {}", tx);
        Ok(tx)
    }

    async fn await_result(&self, tx: &TxRef, confidence: u64) -> Result<ExitCode> {
        if self.is_mock() {
            let state = self.state();
            if state.pending {
                return Err(LedgerError::Transport(format!("{} has not landed yet", tx)));
            }
            return state
                .messages
                .get(tx)
                .map(|m| m.exit_code)
                .ok_or_else(|| LedgerError::NotFound(tx.to_string()));
        }

        let lookup: rpc::MsgLookupJson = self
            .rpc()?
            .call("Filecoin.StateWaitMsg", json!([rpc::cid_json(tx), confidence]))
            .await?;
        Ok(ExitCode(lookup.receipt.exit_code))
    }

    async fn read_capacity(&self, address: &Address) -> Result<Amount> {
        if self.is_mock() {
            return self
                .state()
                .verified_clients
                .get(address)
                .copied()
                .ok_or_else(|| LedgerError::NotFound(address.to_string()));
        }

        let cap: Option<Amount> = self
            .rpc()?
            .call(
                "Filecoin.StateVerifiedClientStatus",
                json!([address.to_string(), Value::Null]),
            )
            .await?;
        cap.ok_or_else(|| LedgerError::NotFound(address.to_string()))
    }

    async fn read_verifier_capacity(&self, address: &Address) -> Result<Amount> {
        if self.is_mock() {
            return self
                .state()
                .verifiers
                .get(address)
                .copied()
                .ok_or_else(|| LedgerError::NotFound(address.to_string()));
        }

        let cap: Option<Amount> = self
            .rpc()?
            .call(
                "Filecoin.StateVerifierStatus",
                json!([address.to_string(), Value::Null]),
            )
            .await?;
        cap.ok_or_else(|| LedgerError::NotFound(address.to_string()))
    }

    async fn read_power(&self, miner: &Address, tip: &TipSetKey) -> Result<Amount> {
        if self.is_mock() {
            let state = self.state();
            let id = state.miners.get(miner).unwrap_or(miner);
            let history = state
                .power_history
                .get(id)
                .ok_or_else(|| LedgerError::NotFound(format!("power of {}", miner)))?;
            let height = if tip.is_head() {
                state.height
            } else {
                MockState::height_of(tip)
                    .ok_or_else(|| LedgerError::NotFound(format!("tipset {:?}", tip.0)))?
            };
            return Ok(history
                .iter()
                .rev()
                .find(|(h, _)| *h <= height)
                .map(|(_, power)| *power)
                .unwrap_or_default());
        }

        let power: rpc::MinerPowerJson = self
            .rpc()?
            .call(
                "Filecoin.StateMinerPower",
                json!([miner.to_string(), rpc::tipset_json(tip)]),
            )
            .await?;
        Ok(power.miner_power.raw_byte_power)
    }

    async fn tip_of(&self, tx: &TxRef) -> Result<TipSetKey> {
        if self.is_mock() {
            return self
                .state()
                .messages
                .get(tx)
                .map(|m| MockState::tip_at(m.height))
                .ok_or_else(|| LedgerError::NotFound(tx.to_string()));
        }

        let lookup: Option<rpc::MsgLookupJson> = self
            .rpc()?
            .call("Filecoin.StateSearchMsg", json!([rpc::cid_json(tx)]))
            .await?;
        lookup
            .map(|l| rpc::tipset_from_links(l.tipset))
            .ok_or_else(|| LedgerError::NotFound(tx.to_string()))
    }

    async fn miner_id(&self, address: &Address) -> Result<Option<Address>> {
        if self.is_mock() {
            return Ok(self.state().miners.get(address).cloned());
        }

        let rpc = self.rpc()?;
        let id: String = match rpc
            .call("Filecoin.StateLookupID", json!([address.to_string(), Value::Null]))
            .await
        {
            Ok(id) => id,
            Err(LedgerError::Remote { message, .. }) => {
                debug!("{} has no ID address: {}", address, message);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match rpc
            .call::<Value>("Filecoin.StateMinerInfo", json!([id, Value::Null]))
            .await
        {
            Ok(_) => Ok(Some(rpc::parse_address(&id)?)),
            Err(LedgerError::Remote { message, .. }) => {
                debug!("{} is not a miner: {}", address, message);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn default_address(&self) -> Result<Address> {
        if self.is_mock() {
            return self
                .state()
                .default_address
                .clone()
                .ok_or_else(|| LedgerError::NotFound("default wallet address".to_string()));
        }

        let address: String = self
            .rpc()?
            .call("Filecoin.WalletDefaultAddress", json!([]))
            .await?;
        rpc::parse_address(&address)
    }

    async fn list_verifiers(&self) -> Result<Vec<VerifiedEntry>> {
        if self.is_mock() {
            return Ok(entries(&self.state().verifiers));
        }
        self.list_registry(RegistryTable::Verifiers).await
    }

    async fn list_verified_clients(&self) -> Result<Vec<VerifiedEntry>> {
        if self.is_mock() {
            return Ok(entries(&self.state().verified_clients));
        }
        self.list_registry(RegistryTable::VerifiedClients).await
    }

    fn mode_name(&self) -> &'static str {
        self.config.mode.as_str()
    }
}

fn entries(map: &BTreeMap<Address, Amount>) -> Vec<VerifiedEntry> {
    map.iter()
        .map(|(address, data_cap)| VerifiedEntry {
            address: address.clone(),
            data_cap: *data_cap,
        })
        .collect()
}
