//! RPC submitter against an in-process JSON-RPC node.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use drip_common::types::Address;
use drip_faucet::chain::signing_key_from_hex;
use drip_faucet::rpc::BlockchainRpcClient;
use drip_faucet::{ChainSubmitter, RpcChainSubmitter, SubmitError, SubmitterSettings, TransferStatus};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const FAUCET_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Receipts {
    Success,
    Reverted,
    Pending,
}

struct MockNode {
    pending_nonce: AtomicU64,
    reject_next: AtomicBool,
    receipts: Mutex<Receipts>,
    sent: Mutex<Vec<Vec<u8>>>,
    calls: Mutex<HashMap<String, usize>>,
    /// Methods answered with a bare 500 instead of JSON.
    failing: Mutex<HashSet<&'static str>>,
}

impl MockNode {
    fn new(pending_nonce: u64) -> Self {
        Self {
            pending_nonce: AtomicU64::new(pending_nonce),
            reject_next: AtomicBool::new(false),
            receipts: Mutex::new(Receipts::Success),
            sent: Mutex::new(Vec::new()),
            calls: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    fn fail(&self, method: &'static str) {
        self.failing.lock().unwrap().insert(method);
    }

    fn calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    fn sent_nonces(&self) -> Vec<u64> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|raw| rlp::Rlp::new(raw).val_at(0).unwrap())
            .collect()
    }

    fn result(&self, method: &str, params: &Value) -> Value {
        match method {
            "eth_chainId" => json!({ "result": "0x7a69" }),
            "eth_gasPrice" => json!({ "result": "0x3b9aca00" }),
            "eth_getBalance" => json!({ "result": "0xde0b6b3a7640000" }),
            "eth_getTransactionCount" => {
                json!({ "result": format!("0x{:x}", self.pending_nonce.load(Ordering::SeqCst)) })
            }
            "eth_sendRawTransaction" => {
                if self.reject_next.swap(false, Ordering::SeqCst) {
                    return json!({ "error": { "code": -32000, "message": "nonce too low" } });
                }
                let text = params[0].as_str().unwrap();
                let raw = hex::decode(text.trim_start_matches("0x")).unwrap();
                let hash = keccak_hash::keccak(&raw);
                self.sent.lock().unwrap().push(raw);
                self.pending_nonce.fetch_add(1, Ordering::SeqCst);
                json!({ "result": format!("0x{}", hex::encode(hash.0)) })
            }
            "eth_getTransactionReceipt" => match *self.receipts.lock().unwrap() {
                Receipts::Pending => json!({ "result": null }),
                Receipts::Success => json!({ "result": { "status": "0x1", "blockNumber": "0x10" } }),
                Receipts::Reverted => json!({ "result": { "status": "0x0", "blockNumber": "0x10" } }),
            },
            other => json!({ "error": { "code": -32601, "message": format!("unknown method {}", other) } }),
        }
    }
}

async fn rpc_handler(State(node): State<Arc<MockNode>>, Json(request): Json<Value>) -> Response {
    let method = request["method"].as_str().unwrap_or_default().to_string();
    *node.calls.lock().unwrap().entry(method.clone()).or_default() += 1;

    if node.failing.lock().unwrap().contains(method.as_str()) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream unavailable").into_response();
    }

    let mut response = node.result(&method, &request["params"]);
    response["jsonrpc"] = json!("2.0");
    response["id"] = request["id"].clone();
    Json(response).into_response()
}

async fn spawn_node(node: Arc<MockNode>) -> String {
    let app = Router::new().route("/", post(rpc_handler)).with_state(node);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn settings() -> SubmitterSettings {
    SubmitterSettings {
        chain_id: Some(31337),
        gas_price: None,
        gas_limit: 21000,
        confirmation_timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(20),
        max_poll_failures: 3,
    }
}

async fn submitter(node: Arc<MockNode>) -> RpcChainSubmitter {
    let url = spawn_node(node).await;
    let rpc = Arc::new(BlockchainRpcClient::new(url).unwrap());
    RpcChainSubmitter::new(rpc, signing_key_from_hex(FAUCET_KEY).unwrap(), settings())
}

fn recipient() -> Address {
    Address([0xaa; 20])
}

#[tokio::test]
async fn test_transfer_confirms_and_nonce_advances() {
    let node = Arc::new(MockNode::new(7));
    let submitter = submitter(node.clone()).await;

    let first = submitter.transfer(&recipient(), 1_000).await.unwrap();
    let second = submitter.transfer(&recipient(), 1_000).await.unwrap();

    assert_ne!(first.tx_hash, second.tx_hash);
    assert_eq!(first.block_number, Some(16));
    assert_eq!(node.sent_nonces(), vec![7, 8]);
    // Nonce is fetched once, then tracked locally.
    assert_eq!(node.calls("eth_getTransactionCount"), 1);
    assert_eq!(node.calls("eth_chainId"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_broadcasts_get_distinct_nonces() {
    let node = Arc::new(MockNode::new(0));
    let submitter = Arc::new(submitter(node.clone()).await);

    let mut handles = Vec::new();
    for i in 0..6u8 {
        let submitter = submitter.clone();
        handles.push(tokio::spawn(async move {
            submitter.broadcast(&Address([i + 1; 20]), 1).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let mut nonces = node.sent_nonces();
    nonces.sort_unstable();
    assert_eq!(nonces, vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_missing_receipt_times_out() {
    let node = Arc::new(MockNode::new(0));
    *node.receipts.lock().unwrap() = Receipts::Pending;
    let submitter = submitter(node.clone()).await;

    let tx_hash = submitter.broadcast(&recipient(), 1).await.unwrap();
    let err = submitter.confirm(&tx_hash).await.unwrap_err();
    assert!(matches!(err, SubmitError::ConfirmationTimeout { tx_hash: h, .. } if h == tx_hash));
    assert_eq!(submitter.status(&tx_hash).await.unwrap(), TransferStatus::Submitted);
}

#[tokio::test]
async fn test_reverted_receipt() {
    let node = Arc::new(MockNode::new(0));
    *node.receipts.lock().unwrap() = Receipts::Reverted;
    let submitter = submitter(node.clone()).await;

    let tx_hash = submitter.broadcast(&recipient(), 1).await.unwrap();
    assert!(matches!(
        submitter.confirm(&tx_hash).await,
        Err(SubmitError::Reverted { .. })
    ));
    assert_eq!(submitter.status(&tx_hash).await.unwrap(), TransferStatus::Reverted);
}

#[tokio::test]
async fn test_unreachable_receipts_end_in_timeout_after_poll_limit() {
    let node = Arc::new(MockNode::new(0));
    let submitter = submitter(node.clone()).await;

    let tx_hash = submitter.broadcast(&recipient(), 1).await.unwrap();
    node.fail("eth_getTransactionReceipt");

    match submitter.confirm(&tx_hash).await {
        Err(SubmitError::ConfirmationTimeout { tx_hash: h, reason }) => {
            assert_eq!(h, tx_hash);
            assert!(reason.contains("after 3 polls"), "{}", reason);
        }
        other => panic!("expected confirmation timeout, got {:?}", other),
    }
    assert_eq!(node.calls("eth_getTransactionReceipt"), 3);
}

#[tokio::test]
async fn test_garbled_broadcast_reply_is_unacknowledged() {
    let node = Arc::new(MockNode::new(4));
    let submitter = submitter(node.clone()).await;
    node.fail("eth_sendRawTransaction");

    let err = submitter.broadcast(&recipient(), 1).await.unwrap_err();
    assert!(
        matches!(err, SubmitError::BroadcastUnacknowledged { .. }),
        "{:?}",
        err
    );

    // The nonce may or may not be spent, so the next attempt asks the node.
    node.failing.lock().unwrap().clear();
    submitter.broadcast(&recipient(), 1).await.unwrap();
    assert_eq!(node.calls("eth_getTransactionCount"), 2);
    assert_eq!(node.sent_nonces(), vec![4]);
}

#[tokio::test]
async fn test_node_rejection_resyncs_nonce() {
    let node = Arc::new(MockNode::new(3));
    let submitter = submitter(node.clone()).await;

    submitter.broadcast(&recipient(), 1).await.unwrap();
    node.reject_next.store(true, Ordering::SeqCst);
    let err = submitter.broadcast(&recipient(), 1).await.unwrap_err();
    assert!(matches!(err, SubmitError::Submission(_)), "{:?}", err);

    submitter.broadcast(&recipient(), 1).await.unwrap();
    assert_eq!(node.sent_nonces(), vec![3, 4]);
    assert_eq!(node.calls("eth_getTransactionCount"), 2);
}

#[tokio::test]
async fn test_rejected_destinations_never_reach_node() {
    let node = Arc::new(MockNode::new(0));
    let submitter = submitter(node.clone()).await;

    let zero = submitter.broadcast(&Address::ZERO, 1).await;
    assert!(matches!(zero, Err(SubmitError::InvalidAddress(_))));
    let own = submitter.broadcast(&submitter.sender(), 1).await;
    assert!(matches!(own, Err(SubmitError::InvalidAddress(_))));
    assert_eq!(node.total_calls(), 0);
}

#[tokio::test]
async fn test_unreachable_node_is_a_submission_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let rpc = Arc::new(BlockchainRpcClient::new(url).unwrap());
    let submitter = RpcChainSubmitter::new(rpc, signing_key_from_hex(FAUCET_KEY).unwrap(), settings());
    let err = submitter.broadcast(&recipient(), 1).await.unwrap_err();
    assert!(matches!(err, SubmitError::Submission(_)), "{:?}", err);
}

#[tokio::test]
async fn test_balance_and_chain_id() {
    let node = Arc::new(MockNode::new(0));
    let url = spawn_node(node.clone()).await;
    let rpc = BlockchainRpcClient::new(url).unwrap();

    assert_eq!(rpc.chain_id().await.unwrap(), 31337);
    assert_eq!(rpc.get_balance(&recipient()).await.unwrap(), 1_000_000_000_000_000_000);
}
