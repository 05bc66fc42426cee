//! JSON-RPC transport tests against a mock node

mod common;

use common::*;
use ledger_anchor::ledger::abi::{self, Token};
use ledger_anchor::ledger::wallet::decode_signed_transaction;
use ledger_anchor::ledger::{JsonRpcConnection, LedgerConnection, LedgerLogClient, TxHash};
use ledger_anchor::AnchorError;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": result}))
}

fn rpc_error(code: i64, message: &str, data: Option<String>) -> ResponseTemplate {
    let mut error = json!({"code": code, "message": message});
    if let Some(data) = data {
        error["data"] = json!(data);
    }
    ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "error": error}))
}

async fn mock_method(server: &MockServer, rpc_method: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": rpc_method})))
        .respond_with(response)
        .mount(server)
        .await;
}

fn client_for(server: &MockServer) -> LedgerLogClient<JsonRpcConnection> {
    LedgerLogClient::new(JsonRpcConnection::new(server.uri()), contract_address())
}

#[tokio::test]
async fn test_chain_id_and_connectivity() {
    let server = MockServer::start().await;
    mock_method(&server, "eth_chainId", rpc_result(json!("0xaa36a7"))).await;
    mock_method(&server, "web3_clientVersion", rpc_result(json!("Geth/v1.13.0"))).await;

    let connection = JsonRpcConnection::new(server.uri());
    assert_eq!(connection.chain_id().await.unwrap(), CHAIN_ID);
    assert!(connection.is_connected().await);
}

#[tokio::test]
async fn test_get_decodes_contract_output() {
    let server = MockServer::start().await;
    let output = abi::encode(&[
        Token::Uint(1_700_000_012),
        Token::String("ab".repeat(32)),
        Token::String("login_failure".to_string()),
    ]);
    mock_method(
        &server,
        "eth_call",
        rpc_result(json!(format!("0x{}", hex::encode(output)))),
    )
    .await;

    let entry = client_for(&server).get(5).await.unwrap();
    assert_eq!(entry.log_id, 5);
    assert_eq!(entry.block_timestamp, 1_700_000_012);
    assert_eq!(entry.log_hash, "ab".repeat(32));
    assert_eq!(entry.log_type, "login_failure");
}

#[tokio::test]
async fn test_get_revert_is_not_found() {
    let server = MockServer::start().await;
    let reason = abi::encode_revert_reason("Log does not exist");
    mock_method(
        &server,
        "eth_call",
        rpc_error(
            3,
            "execution reverted: Log does not exist",
            Some(format!("0x{}", hex::encode(reason))),
        ),
    )
    .await;

    let err = client_for(&server).get(99).await.unwrap_err();
    assert!(matches!(err, AnchorError::NotFoundError(99)));
}

#[tokio::test]
async fn test_get_empty_slot_is_not_found() {
    let server = MockServer::start().await;
    let output = abi::encode(&[
        Token::Uint(0),
        Token::String(String::new()),
        Token::String(String::new()),
    ]);
    mock_method(
        &server,
        "eth_call",
        rpc_result(json!(format!("0x{}", hex::encode(output)))),
    )
    .await;

    let err = client_for(&server).get(3).await.unwrap_err();
    assert!(matches!(err, AnchorError::NotFoundError(3)));
}

#[tokio::test]
async fn test_entry_count() {
    let server = MockServer::start().await;
    let output = abi::encode(&[Token::Uint(12)]);
    mock_method(
        &server,
        "eth_call",
        rpc_result(json!(format!("0x{}", hex::encode(output)))),
    )
    .await;

    assert_eq!(client_for(&server).entry_count().await.unwrap(), 12);
}

#[tokio::test]
async fn test_http_failure_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(matches!(client.get(0).await, Err(AnchorError::NetworkError(_))));
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    // Nothing listens on port 1.
    let client = LedgerLogClient::new(
        JsonRpcConnection::new("http://127.0.0.1:1".to_string()),
        contract_address(),
    );
    assert!(matches!(
        client.entry_count().await,
        Err(AnchorError::NetworkError(_))
    ));
}

#[tokio::test]
async fn test_garbage_body_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>rate limited</html>"))
        .mount(&server)
        .await;

    let err = JsonRpcConnection::new(server.uri()).gas_price().await.unwrap_err();
    assert!(matches!(err, AnchorError::ProtocolError(_)));
}

async fn mock_write_path(server: &MockServer, balance: &str) {
    mock_method(server, "eth_estimateGas", rpc_result(json!("0x11170"))).await;
    mock_method(server, "eth_gasPrice", rpc_result(json!("0x3b9aca00"))).await;
    mock_method(server, "eth_getBalance", rpc_result(json!(balance))).await;
    mock_method(server, "eth_chainId", rpc_result(json!("0xaa36a7"))).await;
    mock_method(server, "eth_getTransactionCount", rpc_result(json!("0x7"))).await;
}

#[tokio::test]
async fn test_append_signs_and_submits() {
    let server = MockServer::start().await;
    mock_write_path(&server, "0xde0b6b3a7640000").await;
    let node_hash = format!("0x{}", "9f".repeat(32));
    mock_method(&server, "eth_sendRawTransaction", rpc_result(json!(node_hash))).await;

    let wallet = random_wallet();
    let signer = wallet.address();
    let client = client_for(&server).with_wallet(wallet);
    let outcome = client.append(&"cd".repeat(32), "login_failure").await.unwrap();

    assert_eq!(outcome.nonce, 7);
    assert_eq!(outcome.gas_limit, 70_000);
    assert_eq!(outcome.gas_price, 1_000_000_000);
    assert_eq!(outcome.transaction, node_hash.parse::<TxHash>().unwrap());

    let requests: Vec<Request> = server.received_requests().await.unwrap();
    let submitted = requests
        .iter()
        .filter_map(|request| request.body_json::<Value>().ok())
        .find(|body| body["method"] == "eth_sendRawTransaction")
        .expect("raw transaction was submitted");
    let raw_hex = submitted["params"][0].as_str().unwrap();
    let raw = hex::decode(raw_hex.trim_start_matches("0x")).unwrap();

    let decoded = decode_signed_transaction(&raw).unwrap();
    assert_eq!(decoded.sender, signer);
    assert_eq!(decoded.chain_id, CHAIN_ID);
    assert_eq!(decoded.transaction.nonce, 7);
    assert_eq!(decoded.transaction.to, contract_address());
    assert_eq!(
        decoded.transaction.data,
        abi::encode_add_log(&"cd".repeat(32), "login_failure")
    );
}

#[tokio::test]
async fn test_append_insufficient_balance_is_not_submitted() {
    let server = MockServer::start().await;
    mock_write_path(&server, "0x0").await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_sendRawTransaction"})))
        .respond_with(rpc_result(json!(format!("0x{}", "00".repeat(32)))))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server).with_wallet(random_wallet());
    let err = client.append(&"cd".repeat(32), "x").await.unwrap_err();
    assert!(matches!(err, AnchorError::InsufficientFundsError(_)));
}

#[tokio::test]
async fn test_node_rejections_are_classified() {
    let server = MockServer::start().await;
    mock_write_path(&server, "0xde0b6b3a7640000").await;
    mock_method(
        &server,
        "eth_sendRawTransaction",
        rpc_error(-32000, "insufficient funds for gas * price + value", None),
    )
    .await;

    let client = client_for(&server).with_wallet(random_wallet());
    let err = client.append(&"cd".repeat(32), "x").await.unwrap_err();
    assert!(matches!(err, AnchorError::InsufficientFundsError(_)));
}

#[tokio::test]
async fn test_estimate_revert_surfaces_reason() {
    let server = MockServer::start().await;
    let reason = abi::encode_revert_reason("Log hash cannot be empty");
    mock_method(
        &server,
        "eth_estimateGas",
        rpc_error(3, "execution reverted", Some(format!("0x{}", hex::encode(reason)))),
    )
    .await;

    let client = client_for(&server).with_wallet(random_wallet());
    match client.append("", "x").await.unwrap_err() {
        AnchorError::ContractRevertError(reason) => assert_eq!(reason, "Log hash cannot be empty"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_pending_receipt_is_none() {
    let server = MockServer::start().await;
    mock_method(&server, "eth_getTransactionReceipt", rpc_result(Value::Null)).await;

    let client = client_for(&server);
    let tx = TxHash([0x44; 32]);
    assert!(client.anchored_entry(&tx).await.unwrap().is_none());
}

#[tokio::test]
async fn test_receipt_log_added_event() {
    let server = MockServer::start().await;
    let tx = TxHash([0x44; 32]);
    let data = abi::encode(&[
        Token::String("ef".repeat(32)),
        Token::String("privilege_change".to_string()),
        Token::Uint(1_700_000_100),
    ]);
    mock_method(
        &server,
        "eth_getTransactionReceipt",
        rpc_result(json!({
            "transactionHash": tx.to_string(),
            "blockNumber": "0x1b4",
            "status": "0x1",
            "logs": [{
                "address": contract_address().to_string(),
                "topics": [
                    format!("0x{}", hex::encode(abi::event_topic(abi::LOG_ADDED))),
                    format!("0x{}", hex::encode(abi::uint_word(41))),
                ],
                "data": format!("0x{}", hex::encode(data)),
            }],
        })),
    )
    .await;

    let anchored = client_for(&server).anchored_entry(&tx).await.unwrap().unwrap();
    assert_eq!(anchored.block_number, 436);
    assert_eq!(anchored.entry.log_id, 41);
    assert_eq!(anchored.entry.log_type, "privilege_change");
    assert_eq!(anchored.entry.block_timestamp, 1_700_000_100);
}

#[tokio::test]
async fn test_failed_receipt_is_revert() {
    let server = MockServer::start().await;
    let tx = TxHash([0x45; 32]);
    mock_method(
        &server,
        "eth_getTransactionReceipt",
        rpc_result(json!({
            "transactionHash": tx.to_string(),
            "blockNumber": "0x10",
            "status": "0x0",
            "logs": [],
        })),
    )
    .await;

    let err = client_for(&server).anchored_entry(&tx).await.unwrap_err();
    assert!(err.is_revert());
}
