//! Ledger Integration Module
//!
//! Everything that talks to the EVM ledger: the connection capability the
//! rest of the crate is written against, the contract ABI codec,
//! transaction signing, and the log client that appends and reads entries.

pub mod abi;
pub mod client;
pub mod memory;
pub mod rlp;
pub mod rpc;
pub mod wallet;

pub use client::{AppendOutcome, LedgerLogClient};
pub use memory::InMemoryLedger;
pub use rpc::JsonRpcConnection;
pub use wallet::Wallet;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

use crate::error::{AnchorError, Result};

/// Capabilities the log client needs from a ledger node.
///
/// Implementations must be safe to share between tasks; none of the
/// methods wait for block inclusion.
#[async_trait]
pub trait LedgerConnection: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    /// Cheap liveness check. Never fails, only reports.
    async fn is_connected(&self) -> bool;

    /// Next nonce for `account`, counting pending transactions.
    async fn transaction_count(&self, account: &Address) -> Result<u64>;

    /// Network-suggested gas price in wei.
    async fn gas_price(&self) -> Result<u128>;

    async fn balance(&self, account: &Address) -> Result<u128>;

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64>;

    /// Execute a read-only call against the latest block.
    async fn call(&self, call: &CallRequest) -> Result<Vec<u8>>;

    /// Broadcast a signed transaction and return its hash.
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash>;

    /// `None` while the transaction is not yet mined.
    async fn transaction_receipt(&self, tx: &TxHash) -> Result<Option<TransactionReceipt>>;
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

fn strip_hex_prefix(text: &str) -> &str {
    let text = text.trim();
    text.strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text)
}

/// 20-byte account or contract address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Mixed-case checksum encoding (EIP-55).
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = keccak256(lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, ch) in lower.chars().enumerate() {
            let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
            if ch.is_ascii_alphabetic() && nibble >= 8 {
                out.push(ch.to_ascii_uppercase());
            } else {
                out.push(ch);
            }
        }
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = AnchorError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(strip_hex_prefix(s))
            .map_err(|e| AnchorError::EncodingError(format!("invalid address {:?}: {}", s, e)))?;
        let array: [u8; 20] = bytes.try_into().map_err(|_| {
            AnchorError::EncodingError(format!("address must be 20 bytes: {:?}", s))
        })?;
        Ok(Self(array))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Transaction hash, the reference returned for every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for TxHash {
    type Err = AnchorError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(strip_hex_prefix(s)).map_err(|e| {
            AnchorError::EncodingError(format!("invalid transaction hash {:?}: {}", s, e))
        })?;
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            AnchorError::EncodingError(format!("transaction hash must be 32 bytes: {:?}", s))
        })?;
        Ok(Self(array))
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Message call, used both for `eth_call` and gas estimation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptLog {
    pub address: Address,
    pub topics: Vec<[u8; 32]>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    pub block_number: u64,
    /// `false` when execution reverted.
    pub status: bool,
    pub logs: Vec<ReceiptLog>,
}

/// An entry as stored by the log contract.
///
/// `log_hash` is kept exactly as the contract returned it so that a
/// corrupted value is still reported rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub log_id: u64,
    pub log_hash: String,
    pub log_type: String,
    /// Seconds since the epoch, assigned by the ledger at inclusion.
    pub block_timestamp: u64,
}

/// Entry learned from the `LogAdded` event of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchoredEntry {
    pub entry: LogEntry,
    pub transaction: TxHash,
    pub block_number: u64,
}
