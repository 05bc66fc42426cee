//! JSON-RPC Ledger Connection
//!
//! Talks to an Ethereum-compatible node (Infura, a local dev chain, ...)
//! over HTTP using the standard `eth_*` methods.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::error::{AnchorError, Result};
use crate::ledger::{
    Address, CallRequest, LedgerConnection, ReceiptLog, TransactionReceipt, TxHash,
};

/// HTTP JSON-RPC client for a single node endpoint
pub struct JsonRpcConnection {
    endpoint: String,
    http_client: Client,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
    #[serde(default)]
    logs: Vec<RpcLog>,
}

#[derive(Debug, Deserialize)]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
}

impl JsonRpcConnection {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            http_client: Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Connection whose HTTP requests give up after `timeout`.
    pub fn with_timeout(endpoint: String, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint,
            http_client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("rpc #{} {}", id, method);

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnchorError::NetworkError(format!(
                "{} returned HTTP {}",
                method, status
            )));
        }

        let body: RpcResponse<T> = response.json().await.map_err(|e| {
            AnchorError::ProtocolError(format!("invalid {} response: {}", method, e))
        })?;

        if let Some(error) = body.error {
            debug!("rpc #{} failed: {} {}", id, error.code, error.message);
            let revert_data = error
                .data
                .as_ref()
                .and_then(Value::as_str)
                .and_then(|text| decode_data(text).ok());
            return Err(AnchorError::from_node_message(
                error.code,
                &error.message,
                revert_data.as_deref(),
            ));
        }

        Ok(body.result)
    }

    async fn request_required<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T> {
        self.request(method, params)
            .await?
            .ok_or_else(|| AnchorError::ProtocolError(format!("{} returned no result", method)))
    }
}

fn call_object(call: &CallRequest) -> Value {
    let mut object = json!({
        "to": call.to.to_string(),
        "data": format!("0x{}", hex::encode(&call.data)),
    });
    if let Some(from) = call.from {
        object["from"] = json!(from.to_string());
    }
    object
}

pub(crate) fn parse_quantity(text: &str) -> Result<u128> {
    let digits = text
        .strip_prefix("0x")
        .ok_or_else(|| AnchorError::ProtocolError(format!("quantity without 0x: {:?}", text)))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| AnchorError::ProtocolError(format!("invalid quantity {:?}: {}", text, e)))
}

fn parse_quantity_u64(text: &str) -> Result<u64> {
    u64::try_from(parse_quantity(text)?)
        .map_err(|_| AnchorError::ProtocolError(format!("quantity {} exceeds 64 bits", text)))
}

pub(crate) fn decode_data(text: &str) -> Result<Vec<u8>> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    hex::decode(digits).map_err(|e| AnchorError::ProtocolError(format!("invalid hex data: {}", e)))
}

fn parse_topic(text: &str) -> Result<[u8; 32]> {
    decode_data(text)?
        .try_into()
        .map_err(|_| AnchorError::ProtocolError(format!("topic is not 32 bytes: {}", text)))
}

impl TryFrom<RpcReceipt> for TransactionReceipt {
    type Error = AnchorError;

    fn try_from(receipt: RpcReceipt) -> Result<Self> {
        let logs = receipt
            .logs
            .into_iter()
            .map(|log| -> Result<ReceiptLog> {
                Ok(ReceiptLog {
                    address: log.address.parse()?,
                    topics: log
                        .topics
                        .iter()
                        .map(|topic| parse_topic(topic))
                        .collect::<Result<Vec<_>>>()?,
                    data: decode_data(&log.data)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(TransactionReceipt {
            transaction_hash: receipt.transaction_hash.parse()?,
            block_number: receipt
                .block_number
                .as_deref()
                .map(parse_quantity_u64)
                .transpose()?
                .unwrap_or_default(),
            status: receipt.status.as_deref() != Some("0x0"),
            logs,
        })
    }
}

#[async_trait]
impl LedgerConnection for JsonRpcConnection {
    async fn chain_id(&self) -> Result<u64> {
        let id: String = self.request_required("eth_chainId", json!([])).await?;
        parse_quantity_u64(&id)
    }

    async fn is_connected(&self) -> bool {
        match self
            .request::<String>("web3_clientVersion", json!([]))
            .await
        {
            Ok(version) => {
                debug!("connected to {:?}", version);
                true
            }
            Err(e) => {
                debug!("connectivity check failed: {}", e);
                false
            }
        }
    }

    async fn transaction_count(&self, account: &Address) -> Result<u64> {
        let count: String = self
            .request_required(
                "eth_getTransactionCount",
                json!([account.to_string(), "pending"]),
            )
            .await?;
        parse_quantity_u64(&count)
    }

    async fn gas_price(&self) -> Result<u128> {
        let price: String = self.request_required("eth_gasPrice", json!([])).await?;
        parse_quantity(&price)
    }

    async fn balance(&self, account: &Address) -> Result<u128> {
        let balance: String = self
            .request_required("eth_getBalance", json!([account.to_string(), "latest"]))
            .await?;
        parse_quantity(&balance)
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64> {
        let gas: String = self
            .request_required("eth_estimateGas", json!([call_object(call)]))
            .await?;
        parse_quantity_u64(&gas)
    }

    async fn call(&self, call: &CallRequest) -> Result<Vec<u8>> {
        let output: String = self
            .request_required("eth_call", json!([call_object(call), "latest"]))
            .await?;
        decode_data(&output)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash> {
        let hash: String = self
            .request_required(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        hash.parse()
    }

    async fn transaction_receipt(&self, tx: &TxHash) -> Result<Option<TransactionReceipt>> {
        let receipt: Option<RpcReceipt> = self
            .request("eth_getTransactionReceipt", json!([tx.to_string()]))
            .await?;
        match receipt {
            // Some nodes return a receipt shell before the block is sealed.
            Some(receipt) if receipt.block_number.is_some() => receipt.try_into().map(Some),
            _ => Ok(None),
        }
    }
}
