//! Minimal Ethereum JSON-RPC client used by the chain submitter.

use crate::error::RpcError;
use drip_common::types::{Address, TxHash};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Fields of a transaction receipt the faucet cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    /// `None` for pre-Byzantium receipts that carry no status field.
    pub success: Option<bool>,
}

/// RPC client for interacting with blockchain
pub struct BlockchainRpcClient {
    rpc_url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl BlockchainRpcClient {
    pub fn new(rpc_url: String) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            rpc_url,
            client,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id
        });
        debug!(method, id, "rpc request");

        let response = self.client.post(&self.rpc_url).json(&payload).send().await?;
        let status = response.status();
        let json: Value = response
            .json()
            .await
            .map_err(|e| RpcError::InvalidResponse(format!("{} ({}): {}", method, status, e)))?;

        if let Some(error) = json.get("error").filter(|e| !e.is_null()) {
            return Err(RpcError::Node {
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            });
        }

        Ok(json.get("result").cloned().unwrap_or(Value::Null))
    }

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        let result = self.call("eth_chainId", json!([])).await?;
        to_u64(parse_quantity(&result)?)
    }

    pub async fn gas_price(&self) -> Result<u128, RpcError> {
        let result = self.call("eth_gasPrice", json!([])).await?;
        parse_quantity(&result)
    }

    /// Next nonce for `address`, counting transactions still in the pool.
    pub async fn get_transaction_count(&self, address: &Address) -> Result<u64, RpcError> {
        let result = self
            .call("eth_getTransactionCount", json!([address.to_string(), "pending"]))
            .await?;
        to_u64(parse_quantity(&result)?)
    }

    pub async fn get_balance(&self, address: &Address) -> Result<u128, RpcError> {
        let result = self
            .call("eth_getBalance", json!([address.to_string(), "latest"]))
            .await?;
        parse_quantity(&result)
    }

    pub async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, RpcError> {
        let result = self
            .call("eth_sendRawTransaction", json!([format!("0x{}", hex::encode(raw))]))
            .await?;
        let text = result
            .as_str()
            .ok_or_else(|| RpcError::InvalidResponse(format!("expected tx hash, got {}", result)))?;
        text.parse()
            .map_err(|e| RpcError::InvalidResponse(format!("bad tx hash {:?}: {}", text, e)))
    }

    /// `None` while the transaction is not yet included.
    pub async fn get_transaction_receipt(
        &self,
        tx_hash: &TxHash,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        let result = self
            .call("eth_getTransactionReceipt", json!([tx_hash.to_string()]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }

        let block_number = match result.get("blockNumber") {
            Some(v) if !v.is_null() => Some(to_u64(parse_quantity(v)?)?),
            _ => None,
        };
        let success = match result.get("status") {
            Some(v) if !v.is_null() => Some(parse_quantity(v)? == 1),
            _ => None,
        };

        Ok(Some(TransactionReceipt {
            tx_hash: *tx_hash,
            block_number,
            success,
        }))
    }
}

/// Decode a `0x`-prefixed hex quantity.
pub fn parse_quantity(value: &Value) -> Result<u128, RpcError> {
    let text = value
        .as_str()
        .ok_or_else(|| RpcError::InvalidResponse(format!("expected hex quantity, got {}", value)))?;
    let digits = text.strip_prefix("0x").unwrap_or(text);
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| RpcError::InvalidResponse(format!("bad quantity {:?}: {}", text, e)))
}

fn to_u64(value: u128) -> Result<u64, RpcError> {
    u64::try_from(value).map_err(|_| RpcError::InvalidResponse(format!("{} overflows u64", value)))
}
