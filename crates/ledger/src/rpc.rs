//! JSON-RPC 2.0 transport to the ledger node

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use grantcraft_core::{Address, Amount, TipSetKey, TxRef};

use crate::hamt::BlockSource;
use crate::{params, LedgerError, Message, Result};

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// HTTP JSON-RPC client for a Lotus-compatible node
pub(crate) struct LotusRpc {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
    next_id: AtomicU64,
}

impl LotusRpc {
    pub(crate) fn new(url: String, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            token,
            next_id: AtomicU64::new(1),
        }
    }

    /// Call `method` and decode its result; a JSON `null` result decodes
    /// into `T` as-is, so use `Option<_>` where the node may return null.
    pub(crate) async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };
        debug!("RPC -> {} (id {})", method, id);

        let mut builder = self.http.post(&self.url).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response: RpcResponse = builder
            .send()
            .await
            .map_err(|e| LedgerError::Transport(format!("{}: {}", method, e)))?
            .json()
            .await
            .map_err(|e| LedgerError::Transport(format!("{} response: {}", method, e)))?;

        if let Some(error) = response.error {
            return Err(LedgerError::Remote {
                code: error.code,
                message: error.message,
            });
        }

        serde_json::from_value(response.result.unwrap_or(Value::Null))
            .map_err(|e| LedgerError::SerializationError(format!("{}: {}", method, e)))
    }
}

#[async_trait]
impl BlockSource for LotusRpc {
    async fn read_block(&self, cid: &str) -> Result<Vec<u8>> {
        let encoded: String = self
            .call("Filecoin.ChainReadObj", json!([{ "/": cid }]))
            .await?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| LedgerError::SerializationError(format!("block {}: {}", cid, e)))
    }
}

/// `{"/": cid}` link form used by the node for CIDs
pub(crate) fn cid_json(tx: &TxRef) -> Value {
    json!({ "/": tx.as_str() })
}

#[derive(Debug, Deserialize)]
pub(crate) struct CidLink {
    #[serde(rename = "/")]
    pub cid: String,
}

pub(crate) fn tipset_json(tip: &TipSetKey) -> Value {
    if tip.is_head() {
        return Value::Null;
    }
    Value::Array(tip.0.iter().map(|cid| json!({ "/": cid })).collect())
}

pub(crate) fn tipset_from_links(links: Vec<CidLink>) -> TipSetKey {
    TipSetKey(links.into_iter().map(|link| link.cid).collect())
}

/// Message in the node's JSON shape
pub(crate) fn message_json(message: &Message) -> Result<Value> {
    let params = params::encode(&message.call)?
        .map(|bytes| Value::String(base64::engine::general_purpose::STANDARD.encode(bytes)))
        .unwrap_or(Value::Null);

    Ok(json!({
        "Version": 0,
        "To": message.to.to_string(),
        "From": message.from.to_string(),
        "Nonce": 0,
        "Value": message.value.to_string(),
        "GasLimit": message.gas_limit,
        "GasPrice": message.gas_price.to_string(),
        "Method": message.call.method_number(),
        "Params": params,
    }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct SignedMessageJson {
    #[serde(rename = "CID")]
    pub cid: CidLink,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReceiptJson {
    #[serde(rename = "ExitCode")]
    pub exit_code: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MsgLookupJson {
    #[serde(rename = "Receipt")]
    pub receipt: ReceiptJson,
    #[serde(rename = "TipSet")]
    pub tipset: Vec<CidLink>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActorJson {
    #[serde(rename = "Head")]
    pub head: CidLink,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClaimJson {
    #[serde(rename = "RawBytePower")]
    pub raw_byte_power: Amount,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MinerPowerJson {
    #[serde(rename = "MinerPower")]
    pub miner_power: ClaimJson,
}

pub(crate) fn parse_address(s: &str) -> Result<Address> {
    Address::parse(s).map_err(|e| LedgerError::SerializationError(e.to_string()))
}
