//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use drip_common::types::{Address, TxHash};
use drip_common::utils::logging::init_test_logging;
use drip_faucet::{
    ChainSubmitter, ClaimCoordinator, ClaimIntent, ClaimLedger, Confirmation, CoordinatorSettings,
    IntentLog, ManualClock, RpcError, SledLedger, StorageError, SubmitError, TransferStatus,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const AMOUNT: u128 = 10_000_000_000_000_000_000;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

pub fn address(s: &str) -> Address {
    Address::parse(s).unwrap()
}

/// How the next broadcast should play out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Confirm,
    Revert,
    Timeout,
    SubmissionFails,
    Unacknowledged,
}

/// Scripted chain submitter. Unscripted broadcasts confirm.
pub struct MockSubmitter {
    script: Mutex<VecDeque<Script>>,
    planned: Mutex<HashMap<TxHash, Script>>,
    statuses: Mutex<HashMap<TxHash, TransferStatus>>,
    broadcasts: AtomicUsize,
    next_id: AtomicU64,
    confirm_delay: Duration,
    sender: Address,
}

impl MockSubmitter {
    pub fn new(confirm_delay: Duration) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            planned: Mutex::new(HashMap::new()),
            statuses: Mutex::new(HashMap::new()),
            broadcasts: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            confirm_delay,
            sender: Address([0xfa; 20]),
        }
    }

    pub fn push(&self, step: Script) {
        self.script.lock().unwrap().push_back(step);
    }

    /// Attempts that reached the broadcast phase.
    pub fn broadcasts(&self) -> usize {
        self.broadcasts.load(Ordering::SeqCst)
    }

    pub fn set_status(&self, tx_hash: TxHash, status: TransferStatus) {
        self.statuses.lock().unwrap().insert(tx_hash, status);
    }

    /// `0x…01`, `0x…02`, … in broadcast order.
    pub fn hash_for(id: u64) -> TxHash {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&id.to_be_bytes());
        TxHash(bytes)
    }
}

#[async_trait]
impl ChainSubmitter for MockSubmitter {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn broadcast(&self, to: &Address, _amount: u128) -> Result<TxHash, SubmitError> {
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        if to.is_zero() {
            return Err(SubmitError::InvalidAddress("zero address not allowed".to_string()));
        }

        let step = self.script.lock().unwrap().pop_front().unwrap_or(Script::Confirm);
        let tx_hash = Self::hash_for(self.next_id.fetch_add(1, Ordering::SeqCst));
        match step {
            Script::SubmissionFails => Err(SubmitError::Submission("node rejected".to_string())),
            Script::Unacknowledged => Err(SubmitError::BroadcastUnacknowledged {
                tx_hash,
                reason: "connection reset".to_string(),
            }),
            other => {
                self.planned.lock().unwrap().insert(tx_hash, other);
                Ok(tx_hash)
            }
        }
    }

    async fn confirm(&self, tx_hash: &TxHash) -> Result<Confirmation, SubmitError> {
        tokio::time::sleep(self.confirm_delay).await;
        let step = self.planned.lock().unwrap().get(tx_hash).copied().unwrap_or(Script::Confirm);
        match step {
            Script::Revert => Err(SubmitError::Reverted { tx_hash: *tx_hash }),
            Script::Timeout => Err(SubmitError::ConfirmationTimeout {
                tx_hash: *tx_hash,
                reason: "no receipt".to_string(),
            }),
            _ => Ok(Confirmation {
                tx_hash: *tx_hash,
                block_number: Some(1),
            }),
        }
    }

    async fn status(&self, tx_hash: &TxHash) -> Result<TransferStatus, RpcError> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(tx_hash)
            .copied()
            .unwrap_or(TransferStatus::Submitted))
    }

    async fn balance(&self) -> Result<u128, RpcError> {
        Ok(1_000 * AMOUNT)
    }
}

/// Sled ledger that counts every call and can be told to fail.
pub struct CountingLedger {
    inner: SledLedger,
    pub calls: AtomicUsize,
    pub fail_reads: AtomicBool,
    pub fail_record: AtomicBool,
}

impl CountingLedger {
    pub fn new() -> Self {
        Self {
            inner: SledLedger::temporary().unwrap(),
            calls: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            fail_record: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn injected() -> StorageError {
        StorageError::Task("injected failure".to_string())
    }

    /// Read without counting.
    pub async fn peek(&self, address: &Address) -> Option<DateTime<Utc>> {
        self.inner.last_claim(address).await.unwrap()
    }

    pub async fn peek_intent(&self, address: &Address) -> Option<ClaimIntent> {
        self.inner.pending_intent(address).await.unwrap()
    }
}

#[async_trait]
impl ClaimLedger for CountingLedger {
    async fn last_claim(&self, address: &Address) -> Result<Option<DateTime<Utc>>, StorageError> {
        self.touch();
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.last_claim(address).await
    }

    async fn record_claim(
        &self,
        address: &Address,
        at: DateTime<Utc>,
        tx_hash: TxHash,
    ) -> Result<(), StorageError> {
        self.touch();
        if self.fail_record.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.record_claim(address, at, tx_hash).await
    }

    async fn claim_count(&self) -> Result<usize, StorageError> {
        self.inner.claim_count().await
    }
}

#[async_trait]
impl IntentLog for CountingLedger {
    async fn begin_intent(&self, intent: &ClaimIntent) -> Result<(), StorageError> {
        self.touch();
        self.inner.begin_intent(intent).await
    }

    async fn mark_broadcast(&self, address: &Address, tx_hash: TxHash) -> Result<(), StorageError> {
        self.touch();
        self.inner.mark_broadcast(address, tx_hash).await
    }

    async fn clear_intent(&self, address: &Address) -> Result<(), StorageError> {
        self.touch();
        self.inner.clear_intent(address).await
    }

    async fn pending_intent(&self, address: &Address) -> Result<Option<ClaimIntent>, StorageError> {
        self.touch();
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.pending_intent(address).await
    }

    async fn pending_intents(&self) -> Result<Vec<ClaimIntent>, StorageError> {
        self.inner.pending_intents().await
    }
}

pub struct Harness {
    pub coordinator: Arc<ClaimCoordinator>,
    pub ledger: Arc<CountingLedger>,
    pub submitter: Arc<MockSubmitter>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    harness_with_delay(Duration::ZERO)
}

pub fn harness_with_delay(confirm_delay: Duration) -> Harness {
    init_test_logging();
    let ledger = Arc::new(CountingLedger::new());
    let submitter = Arc::new(MockSubmitter::new(confirm_delay));
    let clock = Arc::new(ManualClock::new(start_time()));
    let coordinator = Arc::new(ClaimCoordinator::new(
        ledger.clone(),
        ledger.clone(),
        submitter.clone(),
        clock.clone(),
        CoordinatorSettings {
            cooldown: Duration::from_secs(60 * 60),
            amount: AMOUNT,
        },
    ));
    Harness {
        coordinator,
        ledger,
        submitter,
        clock,
    }
}
