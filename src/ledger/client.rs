//! Ledger Log Client
//!
//! Appends digests to the on-chain log and reads entries back. This is the
//! only component that builds or signs transactions.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::error::{AnchorError, Result};
use crate::ledger::abi;
use crate::ledger::wallet::{LegacyTransaction, Wallet};
use crate::ledger::{
    Address, AnchoredEntry, CallRequest, LedgerConnection, LogEntry, TransactionReceipt, TxHash,
};

/// What a successful `append` broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendOutcome {
    pub transaction: TxHash,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
}

/// Client for one deployed log contract.
pub struct LedgerLogClient<C> {
    connection: C,
    contract: Address,
    wallet: Option<Wallet>,
    gas_price_override: Option<u128>,
    chain_id: OnceCell<u64>,
    /// Next nonce this process will use, `None` until learned from the node.
    next_nonce: Mutex<Option<u64>>,
}

impl<C: LedgerConnection> LedgerLogClient<C> {
    /// Read-only client; `append` fails until a wallet is attached.
    pub fn new(connection: C, contract: Address) -> Self {
        Self {
            connection,
            contract,
            wallet: None,
            gas_price_override: None,
            chain_id: OnceCell::new(),
            next_nonce: Mutex::new(None),
        }
    }

    pub fn with_wallet(mut self, wallet: Wallet) -> Self {
        self.wallet = Some(wallet);
        self
    }

    /// Use a fixed gas price instead of the network suggestion.
    pub fn with_gas_price(mut self, wei: u128) -> Self {
        self.gas_price_override = Some(wei);
        self
    }

    /// Pin the chain id instead of asking the node.
    pub fn with_chain_id(self, chain_id: u64) -> Self {
        // A fresh cell cannot already be set.
        let _ = self.chain_id.set(chain_id);
        self
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn signer(&self) -> Option<Address> {
        self.wallet.as_ref().map(Wallet::address)
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    pub async fn chain_id(&self) -> Result<u64> {
        self.chain_id
            .get_or_try_init(|| self.connection.chain_id())
            .await
            .copied()
    }

    fn read_call(&self, data: Vec<u8>) -> CallRequest {
        CallRequest {
            from: None,
            to: self.contract,
            data,
        }
    }

    /// Append `(log_hash, log_type)` to the contract's log.
    ///
    /// Returns as soon as the node accepts the transaction; inclusion is not
    /// awaited. Concurrent appends from this client never share a nonce.
    pub async fn append(&self, log_hash: &str, log_type: &str) -> Result<AppendOutcome> {
        let wallet = self.wallet.as_ref().ok_or_else(|| {
            AnchorError::ConfigError("no signing key configured for writes".to_string())
        })?;
        let sender = wallet.address();

        let call = CallRequest {
            from: Some(sender),
            to: self.contract,
            data: abi::encode_add_log(log_hash, log_type),
        };

        // A call the contract would reject fails here, before a nonce is used.
        let gas_limit = self.connection.estimate_gas(&call).await?;
        let gas_price = match self.gas_price_override {
            Some(price) => price,
            None => self.connection.gas_price().await?,
        };

        let required = u128::from(gas_limit).saturating_mul(gas_price);
        let available = self.connection.balance(&sender).await?;
        if available < required {
            warn!(
                "Account {} cannot cover {} wei for log append",
                sender, required
            );
            return Err(AnchorError::insufficient_funds(required, available));
        }

        let chain_id = self.chain_id().await?;

        let mut next_nonce = self.next_nonce.lock().await;
        let network_nonce = self.connection.transaction_count(&sender).await?;
        let nonce = next_nonce.map_or(network_nonce, |local| local.max(network_nonce));

        let transaction = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit,
            to: self.contract,
            value: 0,
            data: call.data,
        };
        let signed = wallet.sign_transaction(&transaction, chain_id)?;

        match self.connection.send_raw_transaction(&signed.raw).await {
            Ok(hash) => {
                *next_nonce = Some(nonce + 1);
                if hash != signed.hash {
                    debug!("node reported {} for locally computed {}", hash, signed.hash);
                }
                info!(
                    "Submitted log {} ({}) as {} with nonce {}",
                    log_hash, log_type, hash, nonce
                );
                Ok(AppendOutcome {
                    transaction: hash,
                    nonce,
                    gas_limit,
                    gas_price,
                })
            }
            Err(e) => {
                // Re-read from the network next time.
                *next_nonce = None;
                Err(e)
            }
        }
    }

    /// Fetch entry `log_id`. Ids at or beyond the entry count are
    /// `NotFoundError`, whether the contract reverts or hands back an
    /// empty slot.
    pub async fn get(&self, log_id: u64) -> Result<LogEntry> {
        let call = self.read_call(abi::encode_get_log(log_id));
        let output = match self.connection.call(&call).await {
            Ok(output) => output,
            Err(AnchorError::ContractRevertError(reason)) => {
                debug!("getLog({}) reverted: {}", log_id, reason);
                return Err(AnchorError::NotFoundError(log_id));
            }
            Err(e) => return Err(e),
        };
        if output.is_empty() {
            return Err(AnchorError::ProtocolError(format!(
                "no contract code at {}",
                self.contract
            )));
        }

        let (block_timestamp, log_hash, log_type) = abi::decode_get_log(&output)?;
        // A mapping-backed log returns zero values for ids never written.
        if block_timestamp == 0 && log_hash.is_empty() {
            debug!("getLog({}) returned an empty slot", log_id);
            return Err(AnchorError::NotFoundError(log_id));
        }
        Ok(LogEntry {
            log_id,
            log_hash,
            log_type,
            block_timestamp,
        })
    }

    pub async fn entry_count(&self) -> Result<u64> {
        let output = self
            .connection
            .call(&self.read_call(abi::encode_log_count()))
            .await?;
        if output.is_empty() {
            return Err(AnchorError::ProtocolError(format!(
                "no contract code at {}",
                self.contract
            )));
        }
        abi::decode_log_count(&output)
    }

    /// Up to `limit` entries starting at `start`, stopping at the current
    /// entry count.
    pub async fn entries(&self, start: u64, limit: u64) -> Result<Vec<LogEntry>> {
        let count = self.entry_count().await?;
        let end = start.saturating_add(limit).min(count);
        let mut entries = Vec::with_capacity(end.saturating_sub(start) as usize);
        for log_id in start..end {
            entries.push(self.get(log_id).await?);
        }
        Ok(entries)
    }

    /// Look up the entry a mined append produced.
    ///
    /// `Ok(None)` while the transaction is pending. A mined transaction that
    /// reverted is a `ContractRevertError`.
    pub async fn anchored_entry(&self, tx: &TxHash) -> Result<Option<AnchoredEntry>> {
        let Some(receipt) = self.connection.transaction_receipt(tx).await? else {
            return Ok(None);
        };
        self.entry_from_receipt(&receipt).map(Some)
    }

    fn entry_from_receipt(&self, receipt: &TransactionReceipt) -> Result<AnchoredEntry> {
        if !receipt.status {
            return Err(AnchorError::ContractRevertError(format!(
                "transaction {} reverted in block {}",
                receipt.transaction_hash, receipt.block_number
            )));
        }

        let topic = abi::event_topic(abi::LOG_ADDED);
        let log = receipt
            .logs
            .iter()
            .find(|log| log.address == self.contract && log.topics.first() == Some(&topic))
            .ok_or_else(|| {
                AnchorError::ProtocolError(format!(
                    "transaction {} emitted no LogAdded event",
                    receipt.transaction_hash
                ))
            })?;

        let (log_id, log_hash, log_type, block_timestamp) =
            abi::decode_log_added(&log.topics, &log.data)?;
        Ok(AnchoredEntry {
            entry: LogEntry {
                log_id,
                log_hash,
                log_type,
                block_timestamp,
            },
            transaction: receipt.transaction_hash,
            block_number: receipt.block_number,
        })
    }

    /// Poll for the receipt of `tx` up to `attempts` times.
    pub async fn wait_for_entry(
        &self,
        tx: &TxHash,
        interval: Duration,
        attempts: u32,
    ) -> Result<Option<AnchoredEntry>> {
        let mut ticker = tokio::time::interval(interval);
        for attempt in 0..attempts {
            ticker.tick().await;
            if let Some(entry) = self.anchored_entry(tx).await? {
                return Ok(Some(entry));
            }
            debug!("{} still pending after poll {}", tx, attempt + 1);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use std::sync::Arc;

    const CHAIN_ID: u64 = 31337;

    fn funded_client() -> LedgerLogClient<InMemoryLedger> {
        let ledger = InMemoryLedger::new(CHAIN_ID, Address([0xcc; 20]));
        let wallet = Wallet::from_hex(&"33".repeat(32)).unwrap();
        ledger.fund(wallet.address(), 10u128.pow(18));
        LedgerLogClient::new(ledger, Address([0xcc; 20])).with_wallet(wallet)
    }

    #[tokio::test]
    async fn test_append_then_get() {
        let client = funded_client();
        let outcome = client.append(&"ab".repeat(32), "login_failure").await.unwrap();
        assert_eq!(outcome.nonce, 0);

        let entry = client.get(0).await.unwrap();
        assert_eq!(entry.log_hash, "ab".repeat(32));
        assert_eq!(entry.log_type, "login_failure");
        assert_eq!(client.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_append_requires_wallet() {
        let ledger = InMemoryLedger::new(CHAIN_ID, Address([0xcc; 20]));
        let client = LedgerLogClient::new(ledger, Address([0xcc; 20]));
        let err = client.append(&"ab".repeat(32), "x").await.unwrap_err();
        assert!(matches!(err, AnchorError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_get_beyond_count_is_not_found() {
        let client = funded_client();
        client.append(&"ab".repeat(32), "a").await.unwrap();
        assert!(matches!(
            client.get(1).await,
            Err(AnchorError::NotFoundError(1))
        ));
        assert!(matches!(
            client.get(u64::MAX).await,
            Err(AnchorError::NotFoundError(_))
        ));
    }

    #[tokio::test]
    async fn test_revert_surfaces_before_submission() {
        let client = funded_client();
        let err = client.append("", "empty").await.unwrap_err();
        assert!(err.is_revert());
        let signer = client.signer().unwrap();
        assert_eq!(client.connection().nonce_of(&signer), 0);
    }

    #[tokio::test]
    async fn test_insufficient_funds_checked_locally() {
        let client = funded_client().with_gas_price(10u128.pow(16));
        let err = client.append(&"ab".repeat(32), "x").await.unwrap_err();
        assert!(matches!(err, AnchorError::InsufficientFundsError(_)));
        assert_eq!(client.connection().log_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_appends_use_distinct_nonces() {
        let client = Arc::new(funded_client());
        let mut handles = Vec::new();
        for i in 0..8u8 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                client
                    .append(&format!("{:02x}", i).repeat(32), "burst")
                    .await
            }));
        }

        let mut nonces = Vec::new();
        for handle in handles {
            nonces.push(handle.await.unwrap().unwrap().nonce);
        }
        nonces.sort_unstable();
        assert_eq!(nonces, (0..8).collect::<Vec<u64>>());
        assert_eq!(client.entry_count().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_nonce_recovers_after_failed_submission() {
        let client = funded_client();
        client.append(&"01".repeat(32), "a").await.unwrap();

        client.connection().set_offline(true);
        assert!(matches!(
            client.append(&"02".repeat(32), "b").await,
            Err(AnchorError::NetworkError(_))
        ));
        client.connection().set_offline(false);

        let outcome = client.append(&"03".repeat(32), "c").await.unwrap();
        assert_eq!(outcome.nonce, 1);
    }

    #[tokio::test]
    async fn test_anchored_entry_from_receipt() {
        let client = funded_client();
        client.append(&"0a".repeat(32), "first").await.unwrap();
        let outcome = client.append(&"0b".repeat(32), "second").await.unwrap();

        let anchored = client
            .anchored_entry(&outcome.transaction)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(anchored.entry.log_id, 1);
        assert_eq!(anchored.entry.log_type, "second");
        assert_eq!(anchored.entry, client.get(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_pending_receipt() {
        let client = funded_client();
        client.connection().withhold_receipts(true);
        let outcome = client.append(&"0c".repeat(32), "pending").await.unwrap();
        let waited = client
            .wait_for_entry(&outcome.transaction, Duration::from_millis(1), 3)
            .await
            .unwrap();
        assert!(waited.is_none());
    }

    #[tokio::test]
    async fn test_entries_are_clamped_to_count() {
        let client = funded_client();
        for i in 0..3u8 {
            client
                .append(&format!("{:02x}", i).repeat(32), "batch")
                .await
                .unwrap();
        }
        let entries = client.entries(1, 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].log_id, 1);
        assert!(client.entries(5, 10).await.unwrap().is_empty());
    }
}
