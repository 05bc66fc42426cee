//! In-Memory Ledger
//!
//! A single-node simulation of the security log contract. Raw transactions
//! are decoded and their signatures recovered, nonces and balances are
//! enforced, and every accepted transaction is mined immediately into its
//! own block. Used by the test suites and for local dry runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::error::{AnchorError, Result};
use crate::ledger::abi::{self, Kind, Token};
use crate::ledger::wallet::decode_signed_transaction;
use crate::ledger::{
    Address, CallRequest, LedgerConnection, ReceiptLog, TransactionReceipt, TxHash,
};

const BASE_GAS: u64 = 21_000;
const GAS_PER_DATA_BYTE: u64 = 16;
const STORAGE_GAS: u64 = 45_000;
const DEFAULT_GAS_PRICE: u128 = 1_000_000_000;
const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

#[derive(Debug, Clone)]
struct StoredLog {
    block_timestamp: u64,
    log_hash: String,
    log_type: String,
}

#[derive(Debug, Default)]
struct LedgerState {
    logs: Vec<StoredLog>,
    nonces: HashMap<Address, u64>,
    balances: HashMap<Address, u128>,
    receipts: HashMap<TxHash, TransactionReceipt>,
    block_number: u64,
    clock: u64,
    gas_price: u128,
    offline: bool,
    withhold_receipts: bool,
}

/// Simulated ledger hosting one log contract.
pub struct InMemoryLedger {
    chain_id: u64,
    contract: Address,
    state: Mutex<LedgerState>,
}

enum Execution {
    Appended(u64, StoredLog),
    Reverted(Vec<u8>),
}

impl InMemoryLedger {
    pub fn new(chain_id: u64, contract: Address) -> Self {
        Self {
            chain_id,
            contract,
            state: Mutex::new(LedgerState {
                clock: GENESIS_TIMESTAMP,
                gas_price: DEFAULT_GAS_PRICE,
                ..LedgerState::default()
            }),
        }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Credit `wei` to `account`.
    pub fn fund(&self, account: Address, wei: u128) {
        let mut state = self.lock();
        *state.balances.entry(account).or_default() += wei;
    }

    pub fn set_gas_price(&self, wei: u128) {
        self.lock().gas_price = wei;
    }

    /// While offline every call fails as if the endpoint were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Keep mined transactions' receipts hidden, as if still pending.
    pub fn withhold_receipts(&self, withhold: bool) {
        self.lock().withhold_receipts = withhold;
    }

    /// Advance the block clock by `seconds`.
    pub fn advance_time(&self, seconds: u64) {
        self.lock().clock += seconds;
    }

    pub fn log_count(&self) -> u64 {
        self.lock().logs.len() as u64
    }

    pub fn nonce_of(&self, account: &Address) -> u64 {
        self.lock().nonces.get(account).copied().unwrap_or_default()
    }

    pub fn balance_of(&self, account: &Address) -> u128 {
        self.lock().balances.get(account).copied().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        // A panicking test thread must not wedge the other tests.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn online(&self) -> Result<std::sync::MutexGuard<'_, LedgerState>> {
        let state = self.lock();
        if state.offline {
            return Err(AnchorError::NetworkError(
                "connection refused (simulated outage)".to_string(),
            ));
        }
        Ok(state)
    }

    fn intrinsic_gas(data: &[u8]) -> u64 {
        BASE_GAS + GAS_PER_DATA_BYTE * data.len() as u64
    }

    /// Run `addLog` against the current state without committing.
    fn execute_add_log(state: &LedgerState, data: &[u8]) -> Execution {
        let Some(args) = data.strip_prefix(&abi::selector(abi::ADD_LOG)[..]) else {
            return Execution::Reverted(Vec::new());
        };
        let (log_hash, log_type) = match abi::decode(&[Kind::String, Kind::String], args) {
            Ok(tokens) => match tokens.as_slice() {
                [Token::String(hash), Token::String(log_type)] => (hash.clone(), log_type.clone()),
                _ => return Execution::Reverted(Vec::new()),
            },
            Err(_) => return Execution::Reverted(Vec::new()),
        };
        if log_hash.is_empty() {
            return Execution::Reverted(abi::encode_revert_reason("Log hash cannot be empty"));
        }
        Execution::Appended(
            state.logs.len() as u64,
            StoredLog {
                block_timestamp: state.clock,
                log_hash,
                log_type,
            },
        )
    }

    fn revert(data: Vec<u8>) -> AnchorError {
        AnchorError::from_node_message(3, "execution reverted", Some(&data))
    }
}

#[async_trait]
impl LedgerConnection for InMemoryLedger {
    async fn chain_id(&self) -> Result<u64> {
        self.online()?;
        Ok(self.chain_id)
    }

    async fn is_connected(&self) -> bool {
        !self.lock().offline
    }

    async fn transaction_count(&self, account: &Address) -> Result<u64> {
        let state = self.online()?;
        Ok(state.nonces.get(account).copied().unwrap_or_default())
    }

    async fn gas_price(&self) -> Result<u128> {
        Ok(self.online()?.gas_price)
    }

    async fn balance(&self, account: &Address) -> Result<u128> {
        let state = self.online()?;
        Ok(state.balances.get(account).copied().unwrap_or_default())
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64> {
        let state = self.online()?;
        if call.to != self.contract {
            return Ok(BASE_GAS);
        }
        match Self::execute_add_log(&state, &call.data) {
            Execution::Appended(..) => Ok(Self::intrinsic_gas(&call.data) + STORAGE_GAS),
            Execution::Reverted(data) => Err(Self::revert(data)),
        }
    }

    async fn call(&self, call: &CallRequest) -> Result<Vec<u8>> {
        let state = self.online()?;
        if call.to != self.contract {
            return Ok(Vec::new());
        }

        if call.data.as_slice() == abi::selector(abi::LOG_COUNT) {
            return Ok(abi::encode(&[Token::Uint(state.logs.len() as u64)]));
        }

        if let Some(args) = call.data.strip_prefix(&abi::selector(abi::GET_LOG)[..]) {
            let log_id = match abi::decode(&[Kind::Uint], args)?.as_slice() {
                [Token::Uint(id)] => *id,
                _ => return Err(Self::revert(Vec::new())),
            };
            let Some(log) = usize::try_from(log_id).ok().and_then(|i| state.logs.get(i)) else {
                return Err(Self::revert(abi::encode_revert_reason("Log does not exist")));
            };
            return Ok(abi::encode(&[
                Token::Uint(log.block_timestamp),
                Token::String(log.log_hash.clone()),
                Token::String(log.log_type.clone()),
            ]));
        }

        Err(Self::revert(Vec::new()))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash> {
        let decoded = decode_signed_transaction(raw)?;
        let mut state = self.online()?;
        let tx = &decoded.transaction;

        if decoded.chain_id != self.chain_id {
            return Err(AnchorError::from_node_message(
                -32000,
                &format!("invalid chain id {}", decoded.chain_id),
                None,
            ));
        }

        let expected_nonce = state.nonces.get(&decoded.sender).copied().unwrap_or_default();
        if tx.nonce != expected_nonce {
            let relation = if tx.nonce < expected_nonce { "low" } else { "high" };
            return Err(AnchorError::from_node_message(
                -32000,
                &format!(
                    "nonce too {}: next nonce {}, tx nonce {}",
                    relation, expected_nonce, tx.nonce
                ),
                None,
            ));
        }

        let max_cost = u128::from(tx.gas_limit)
            .saturating_mul(tx.gas_price)
            .saturating_add(tx.value);
        let balance = state.balances.get(&decoded.sender).copied().unwrap_or_default();
        if balance < max_cost {
            return Err(AnchorError::from_node_message(
                -32000,
                &format!(
                    "insufficient funds for gas * price + value: have {} want {}",
                    balance, max_cost
                ),
                None,
            ));
        }

        if Self::intrinsic_gas(&tx.data) > tx.gas_limit {
            return Err(AnchorError::from_node_message(-32000, "intrinsic gas too low", None));
        }

        state.block_number += 1;
        state.clock += 12;
        let block_number = state.block_number;

        let execution = if tx.to == self.contract {
            Self::execute_add_log(&state, &tx.data)
        } else {
            Execution::Reverted(Vec::new())
        };

        let (status, logs, gas_used) = match execution {
            Execution::Appended(log_id, log)
                if Self::intrinsic_gas(&tx.data) + STORAGE_GAS <= tx.gas_limit =>
            {
                let log = StoredLog {
                    block_timestamp: state.clock,
                    ..log
                };
                let event = ReceiptLog {
                    address: self.contract,
                    topics: vec![abi::event_topic(abi::LOG_ADDED), abi::uint_word(log_id)],
                    data: abi::encode(&[
                        Token::String(log.log_hash.clone()),
                        Token::String(log.log_type.clone()),
                        Token::Uint(log.block_timestamp),
                    ]),
                };
                debug!("in-memory ledger appended log {}", log_id);
                state.logs.push(log);
                (true, vec![event], Self::intrinsic_gas(&tx.data) + STORAGE_GAS)
            }
            // Out of gas or reverted: the nonce and the gas are still spent.
            _ => (false, Vec::new(), tx.gas_limit),
        };

        let fee = u128::from(gas_used).saturating_mul(tx.gas_price);
        if let Some(balance) = state.balances.get_mut(&decoded.sender) {
            *balance = balance.saturating_sub(fee);
        }
        *state.nonces.entry(decoded.sender).or_default() += 1;
        state.receipts.insert(
            decoded.hash,
            TransactionReceipt {
                transaction_hash: decoded.hash,
                block_number,
                status,
                logs,
            },
        );

        Ok(decoded.hash)
    }

    async fn transaction_receipt(&self, tx: &TxHash) -> Result<Option<TransactionReceipt>> {
        let state = self.online()?;
        if state.withhold_receipts {
            return Ok(None);
        }
        Ok(state.receipts.get(tx).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::wallet::{LegacyTransaction, Wallet};

    fn setup() -> (InMemoryLedger, Wallet) {
        let ledger = InMemoryLedger::new(31337, Address([0xcc; 20]));
        let wallet = Wallet::from_hex(&"11".repeat(32)).unwrap();
        ledger.fund(wallet.address(), 10u128.pow(18));
        (ledger, wallet)
    }

    fn add_log_tx(ledger: &InMemoryLedger, nonce: u64, hash: &str) -> LegacyTransaction {
        LegacyTransaction {
            nonce,
            gas_price: DEFAULT_GAS_PRICE,
            gas_limit: 200_000,
            to: ledger.contract(),
            value: 0,
            data: abi::encode_add_log(hash, "login_failure"),
        }
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let (ledger, wallet) = setup();
        let tx = add_log_tx(&ledger, 0, &"aa".repeat(32));
        let signed = wallet.sign_transaction(&tx, 31337).unwrap();
        let hash = ledger.send_raw_transaction(&signed.raw).await.unwrap();

        assert_eq!(hash, signed.hash);
        assert_eq!(ledger.log_count(), 1);
        assert_eq!(ledger.nonce_of(&wallet.address()), 1);

        let output = ledger
            .call(&CallRequest {
                from: None,
                to: ledger.contract(),
                data: abi::encode_get_log(0),
            })
            .await
            .unwrap();
        let (_, stored_hash, stored_type) = abi::decode_get_log(&output).unwrap();
        assert_eq!(stored_hash, "aa".repeat(32));
        assert_eq!(stored_type, "login_failure");

        let receipt = ledger.transaction_receipt(&hash).await.unwrap().unwrap();
        assert!(receipt.status);
        assert_eq!(receipt.logs.len(), 1);
    }

    #[tokio::test]
    async fn test_nonce_reuse_rejected() {
        let (ledger, wallet) = setup();
        let first = wallet
            .sign_transaction(&add_log_tx(&ledger, 0, &"aa".repeat(32)), 31337)
            .unwrap();
        ledger.send_raw_transaction(&first.raw).await.unwrap();

        let replay = wallet
            .sign_transaction(&add_log_tx(&ledger, 0, &"bb".repeat(32)), 31337)
            .unwrap();
        let err = ledger.send_raw_transaction(&replay.raw).await.unwrap_err();
        assert!(matches!(err, AnchorError::NetworkError(ref m) if m.contains("nonce too low")));
        assert_eq!(ledger.log_count(), 1);
    }

    #[tokio::test]
    async fn test_wrong_chain_rejected() {
        let (ledger, wallet) = setup();
        let signed = wallet
            .sign_transaction(&add_log_tx(&ledger, 0, &"aa".repeat(32)), 1)
            .unwrap();
        assert!(ledger.send_raw_transaction(&signed.raw).await.is_err());
        assert_eq!(ledger.nonce_of(&wallet.address()), 0);
    }

    #[tokio::test]
    async fn test_unfunded_sender_rejected() {
        let ledger = InMemoryLedger::new(31337, Address([0xcc; 20]));
        let wallet = Wallet::from_hex(&"22".repeat(32)).unwrap();
        let signed = wallet
            .sign_transaction(&add_log_tx(&ledger, 0, &"aa".repeat(32)), 31337)
            .unwrap();
        let err = ledger.send_raw_transaction(&signed.raw).await.unwrap_err();
        assert!(matches!(err, AnchorError::InsufficientFundsError(_)));
    }

    #[tokio::test]
    async fn test_reverted_transaction_consumes_nonce() {
        let (ledger, wallet) = setup();
        let signed = wallet
            .sign_transaction(&add_log_tx(&ledger, 0, ""), 31337)
            .unwrap();
        let hash = ledger.send_raw_transaction(&signed.raw).await.unwrap();

        let receipt = ledger.transaction_receipt(&hash).await.unwrap().unwrap();
        assert!(!receipt.status);
        assert_eq!(ledger.log_count(), 0);
        assert_eq!(ledger.nonce_of(&wallet.address()), 1);
        assert!(ledger.balance_of(&wallet.address()) < 10u128.pow(18));
    }

    #[tokio::test]
    async fn test_get_log_out_of_range_reverts() {
        let (ledger, _) = setup();
        let err = ledger
            .call(&CallRequest {
                from: None,
                to: ledger.contract(),
                data: abi::encode_get_log(0),
            })
            .await
            .unwrap_err();
        match err {
            AnchorError::ContractRevertError(reason) => assert_eq!(reason, "Log does not exist"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_offline_ledger() {
        let (ledger, _) = setup();
        ledger.set_offline(true);
        assert!(!ledger.is_connected().await);
        assert!(matches!(
            ledger.chain_id().await,
            Err(AnchorError::NetworkError(_))
        ));
    }
}
