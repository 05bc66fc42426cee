#![allow(dead_code)]

use ledger_anchor::ledger::{Address, InMemoryLedger, LedgerLogClient, Wallet};
use ledger_anchor::{EventDetails, EventTimestamp};
use rand::rngs::OsRng;
use secp256k1::SecretKey;
use serde_json::json;
use std::sync::Arc;

pub const CHAIN_ID: u64 = 11_155_111;

/// One ether, enough for thousands of appends at the default gas price.
pub const FUNDING: u128 = 1_000_000_000_000_000_000;

pub fn contract_address() -> Address {
    "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        .parse()
        .expect("valid contract address")
}

/// Generate a fresh signing key
pub fn random_wallet() -> Wallet {
    Wallet::from_secret_key(SecretKey::new(&mut OsRng))
}

/// Client over a simulated ledger with a funded signer
pub fn setup_client() -> Arc<LedgerLogClient<InMemoryLedger>> {
    setup_client_with_funds(FUNDING)
}

pub fn setup_client_with_funds(wei: u128) -> Arc<LedgerLogClient<InMemoryLedger>> {
    let ledger = InMemoryLedger::new(CHAIN_ID, contract_address());
    let wallet = random_wallet();
    ledger.fund(wallet.address(), wei);
    Arc::new(LedgerLogClient::new(ledger, contract_address()).with_wallet(wallet))
}

pub fn login_failure_details() -> EventDetails {
    EventDetails::from_value(json!({"user": "alice", "ip": "10.0.0.1"}))
        .expect("details are an object")
}

/// Same mapping as `login_failure_details`, built in the other key order
pub fn reordered_login_failure_details() -> EventDetails {
    let mut details = EventDetails::new();
    details.insert("ip", "10.0.0.1");
    details.insert("user", "alice");
    details
}

pub fn t0() -> EventTimestamp {
    "2025-03-14T09:26:53.589793+00:00"
        .parse()
        .expect("valid timestamp")
}
