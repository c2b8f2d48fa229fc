//! Claim coordination: eligibility, per-address exclusion, transfer and
//! ledger commit.
//!
//! A claim never retries across the chain boundary. Anything that may have
//! moved funds without being recorded surfaces as
//! [`ClaimOutcome::Indeterminate`] and leaves its intent in the log, which
//! keeps the address blocked until [`ClaimCoordinator::reconcile`] or an
//! operator resolves it.

use crate::chain::{ChainSubmitter, TransferStatus};
use crate::clock::Clock;
use crate::error::{StorageError, SubmitError};
use crate::ledger::{ClaimIntent, ClaimLedger, IntentLog};
use crate::locks::AddressLocks;
use crate::metrics::FaucetMetrics;
use chrono::{DateTime, Utc};
use drip_common::types::{Address, TxHash};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60 * 60);

/// Why a claim moved no funds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The submitter refused the destination before signing.
    Rejected(String),
    /// Nothing was broadcast.
    Submission(String),
    /// Included on-chain but failed; the nonce is spent, no value moved.
    Reverted(TxHash),
    /// The ledger was unavailable before any transfer was attempted.
    Storage(String),
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::Rejected(_) => "DESTINATION_REJECTED",
            FailureReason::Submission(_) => "SUBMISSION_FAILED",
            FailureReason::Reverted(_) => "TRANSFER_REVERTED",
            FailureReason::Storage(_) => "STORAGE_UNAVAILABLE",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Rejected(msg) => write!(f, "destination rejected: {}", msg),
            FailureReason::Submission(msg) => write!(f, "submission failed: {}", msg),
            FailureReason::Reverted(tx_hash) => write!(f, "transaction {} reverted", tx_hash),
            FailureReason::Storage(msg) => write!(f, "ledger unavailable: {}", msg),
        }
    }
}

/// Why the real-world effect of a claim is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndeterminateReason {
    /// Broadcast may have reached the node; no acknowledgement.
    BroadcastUnacknowledged,
    /// Broadcast accepted; confirmation not observed in time.
    ConfirmationTimeout,
    /// Transfer confirmed; the ledger write failed.
    LedgerWriteFailed,
    /// An earlier attempt for this address is still unresolved.
    PendingReconciliation,
    /// The claim task died before reporting back.
    Aborted,
}

impl IndeterminateReason {
    pub fn code(&self) -> &'static str {
        match self {
            IndeterminateReason::BroadcastUnacknowledged => "BROADCAST_UNACKNOWLEDGED",
            IndeterminateReason::ConfirmationTimeout => "CONFIRMATION_TIMEOUT",
            IndeterminateReason::LedgerWriteFailed => "LEDGER_WRITE_FAILED",
            IndeterminateReason::PendingReconciliation => "PENDING_RECONCILIATION",
            IndeterminateReason::Aborted => "CLAIM_ABORTED",
        }
    }
}

/// Result of one claim. Closed: callers must handle every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed {
        tx_hash: TxHash,
    },
    RateLimited {
        retry_after: Duration,
    },
    InvalidAddress(String),
    TransferFailed(FailureReason),
    Indeterminate {
        tx_hash: Option<TxHash>,
        reason: IndeterminateReason,
        detail: String,
    },
}

impl ClaimOutcome {
    /// Metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            ClaimOutcome::Claimed { .. } => "claimed",
            ClaimOutcome::RateLimited { .. } => "rate_limited",
            ClaimOutcome::InvalidAddress(_) => "invalid_address",
            ClaimOutcome::TransferFailed(_) => "transfer_failed",
            ClaimOutcome::Indeterminate { .. } => "indeterminate",
        }
    }

    fn indeterminate(tx_hash: Option<TxHash>, reason: IndeterminateReason, detail: String) -> Self {
        ClaimOutcome::Indeterminate { tx_hash, reason, detail }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    Confirmed,
    Rejected,
    Failed,
}

/// One in-flight claim, owned by a single `claim` call.
#[derive(Debug)]
struct ClaimAttempt {
    address: Address,
    requested_at: DateTime<Utc>,
    state: AttemptState,
}

impl ClaimAttempt {
    fn new(address: Address, requested_at: DateTime<Utc>) -> Self {
        Self {
            address,
            requested_at,
            state: AttemptState::Pending,
        }
    }

    fn finish(mut self, outcome: ClaimOutcome) -> ClaimOutcome {
        self.state = match &outcome {
            ClaimOutcome::Claimed { .. } => AttemptState::Confirmed,
            ClaimOutcome::RateLimited { .. } | ClaimOutcome::InvalidAddress(_) => AttemptState::Rejected,
            ClaimOutcome::TransferFailed(_) | ClaimOutcome::Indeterminate { .. } => AttemptState::Failed,
        };
        debug!(
            address = %self.address,
            requested_at = %self.requested_at,
            state = ?self.state,
            "claim attempt finished"
        );
        outcome
    }
}

/// What a reconciliation sweep did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcileReport {
    /// Confirmed transfers written to the ledger.
    pub recorded: usize,
    /// Intents dropped because their transfer reverted.
    pub released: usize,
    /// Intents that still need an operator or a later sweep.
    pub unresolved: Vec<ClaimIntent>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub cooldown: Duration,
    /// Wei per claim.
    pub amount: u128,
}

pub struct ClaimCoordinator {
    ledger: Arc<dyn ClaimLedger>,
    intents: Arc<dyn IntentLog>,
    submitter: Arc<dyn ChainSubmitter>,
    clock: Arc<dyn Clock>,
    locks: AddressLocks,
    settings: CoordinatorSettings,
    metrics: Option<FaucetMetrics>,
}

impl ClaimCoordinator {
    pub fn new(
        ledger: Arc<dyn ClaimLedger>,
        intents: Arc<dyn IntentLog>,
        submitter: Arc<dyn ChainSubmitter>,
        clock: Arc<dyn Clock>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            ledger,
            intents,
            submitter,
            clock,
            locks: AddressLocks::new(),
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: FaucetMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Claims currently holding or waiting on an address lock.
    pub fn in_flight(&self) -> usize {
        self.locks.in_flight()
    }

    /// Dispense to `wallet_address` if it is outside its cooldown.
    ///
    /// The attempt runs on its own task: dropping the returned future (a
    /// client hanging up, say) does not interrupt a transfer that is already
    /// on its way to the chain.
    pub async fn claim(self: &Arc<Self>, wallet_address: &str) -> ClaimOutcome {
        let coordinator = Arc::clone(self);
        let wallet_address = wallet_address.to_string();
        let task = tokio::spawn(async move { coordinator.run_claim(&wallet_address).await });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("claim task failed: {}", e);
                ClaimOutcome::indeterminate(None, IndeterminateReason::Aborted, e.to_string())
            }
        }
    }

    async fn run_claim(&self, wallet_address: &str) -> ClaimOutcome {
        let started = Instant::now();

        let outcome = match Address::parse(wallet_address) {
            Ok(address) => self.claim_address(address).await,
            Err(e) => {
                debug!("rejected claim for {:?}: {}", wallet_address, e);
                ClaimOutcome::InvalidAddress(e.to_string())
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.claims_total.with_label_values(&[outcome.kind()]).inc();
            metrics.claim_duration.observe(started.elapsed().as_secs_f64());
        }
        if matches!(outcome, ClaimOutcome::Indeterminate { .. }) {
            self.refresh_unresolved_gauge().await;
        }
        outcome
    }

    async fn refresh_unresolved_gauge(&self) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        match self.intents.pending_intents().await {
            Ok(intents) => metrics.unresolved_intents.set(intents.len() as i64),
            Err(e) => warn!("failed to count unresolved intents: {}", e),
        }
    }

    async fn claim_address(&self, address: Address) -> ClaimOutcome {
        let _guard = self.locks.acquire(address).await;

        let now = self.clock.now();
        let attempt = ClaimAttempt::new(address, now);

        match self.intents.pending_intent(&address).await {
            Ok(None) => {}
            Ok(Some(intent)) => {
                warn!(%address, started_at = %intent.started_at, "claim blocked by unresolved intent");
                return attempt.finish(ClaimOutcome::indeterminate(
                    intent.tx_hash,
                    IndeterminateReason::PendingReconciliation,
                    format!("claim started at {} is awaiting reconciliation", intent.started_at),
                ));
            }
            Err(e) => return attempt.finish(storage_unavailable(&address, e)),
        }

        match self.ledger.last_claim(&address).await {
            Ok(Some(last)) => {
                if let Some(retry_after) = remaining_cooldown(self.settings.cooldown, last, now) {
                    info!(%address, retry_after_secs = retry_after.as_secs(), "claim rate limited");
                    return attempt.finish(ClaimOutcome::RateLimited { retry_after });
                }
            }
            Ok(None) => {}
            Err(e) => return attempt.finish(storage_unavailable(&address, e)),
        }

        if let Err(e) = self.intents.begin_intent(&ClaimIntent::new(address, now)).await {
            return attempt.finish(storage_unavailable(&address, e));
        }

        let tx_hash = match self.submitter.broadcast(&address, self.settings.amount).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => return attempt.finish(self.broadcast_failed(&address, e).await),
        };

        if let Err(e) = self.intents.mark_broadcast(&address, tx_hash).await {
            // The intent still blocks the address; only automatic
            // reconciliation is lost.
            error!(%address, %tx_hash, "failed to stamp intent with tx hash: {}", e);
        }

        let outcome = match self.submitter.confirm(&tx_hash).await {
            Ok(confirmation) => {
                match self.ledger.record_claim(&address, now, confirmation.tx_hash).await {
                    Ok(()) => {
                        self.release_intent(&address).await;
                        info!(%address, tx_hash = %confirmation.tx_hash, "claim confirmed");
                        ClaimOutcome::Claimed { tx_hash: confirmation.tx_hash }
                    }
                    Err(e) => {
                        error!(
                            %address,
                            %tx_hash,
                            "transfer confirmed but ledger write failed, reconcile manually: {}",
                            e
                        );
                        ClaimOutcome::indeterminate(
                            Some(tx_hash),
                            IndeterminateReason::LedgerWriteFailed,
                            e.to_string(),
                        )
                    }
                }
            }
            Err(SubmitError::Reverted { tx_hash }) => {
                self.release_intent(&address).await;
                warn!(%address, %tx_hash, "transfer reverted");
                ClaimOutcome::TransferFailed(FailureReason::Reverted(tx_hash))
            }
            Err(e) => {
                warn!(%address, %tx_hash, "transfer outcome unknown: {}", e);
                ClaimOutcome::indeterminate(
                    Some(tx_hash),
                    IndeterminateReason::ConfirmationTimeout,
                    e.to_string(),
                )
            }
        };
        attempt.finish(outcome)
    }

    async fn broadcast_failed(&self, address: &Address, err: SubmitError) -> ClaimOutcome {
        match err {
            SubmitError::InvalidAddress(msg) => {
                self.release_intent(address).await;
                warn!(%address, "destination rejected: {}", msg);
                ClaimOutcome::TransferFailed(FailureReason::Rejected(msg))
            }
            SubmitError::Submission(msg) => {
                self.release_intent(address).await;
                warn!(%address, "submission failed: {}", msg);
                ClaimOutcome::TransferFailed(FailureReason::Submission(msg))
            }
            SubmitError::Reverted { tx_hash } => {
                self.release_intent(address).await;
                ClaimOutcome::TransferFailed(FailureReason::Reverted(tx_hash))
            }
            SubmitError::BroadcastUnacknowledged { tx_hash, reason } => {
                if let Err(e) = self.intents.mark_broadcast(address, tx_hash).await {
                    error!(%address, %tx_hash, "failed to stamp intent with tx hash: {}", e);
                }
                warn!(%address, %tx_hash, "broadcast unacknowledged: {}", reason);
                ClaimOutcome::indeterminate(
                    Some(tx_hash),
                    IndeterminateReason::BroadcastUnacknowledged,
                    reason,
                )
            }
            SubmitError::ConfirmationTimeout { tx_hash, reason } => ClaimOutcome::indeterminate(
                Some(tx_hash),
                IndeterminateReason::ConfirmationTimeout,
                reason,
            ),
        }
    }

    async fn release_intent(&self, address: &Address) {
        if let Err(e) = self.intents.clear_intent(address).await {
            // Fails closed: the address stays blocked until reconciled.
            error!(%address, "failed to clear claim intent: {}", e);
        }
    }

    /// Resolve intents left behind by indeterminate claims.
    ///
    /// Each intent is examined under its address lock. A confirmed transfer is
    /// written to the ledger at the intent's start time; a reverted one just
    /// releases the address. Intents without a hash, or whose transaction has
    /// no receipt yet, are reported as unresolved.
    pub async fn reconcile(&self) -> Result<ReconcileReport, StorageError> {
        let mut report = ReconcileReport::default();

        for candidate in self.intents.pending_intents().await? {
            let address = candidate.address;
            let _guard = self.locks.acquire(address).await;

            let Some(intent) = self.intents.pending_intent(&address).await? else {
                continue;
            };
            let Some(tx_hash) = intent.tx_hash else {
                report.unresolved.push(intent);
                continue;
            };

            match self.submitter.status(&tx_hash).await {
                Ok(TransferStatus::Confirmed) | Ok(TransferStatus::Unknown) => {
                    self.ledger.record_claim(&address, intent.started_at, tx_hash).await?;
                    self.intents.clear_intent(&address).await?;
                    info!(%address, %tx_hash, "reconciled confirmed claim");
                    report.recorded += 1;
                }
                Ok(TransferStatus::Reverted) => {
                    self.intents.clear_intent(&address).await?;
                    info!(%address, %tx_hash, "reconciled reverted claim");
                    report.released += 1;
                }
                Ok(TransferStatus::Submitted) => report.unresolved.push(intent),
                Err(e) => {
                    warn!(%address, %tx_hash, "status lookup failed during reconciliation: {}", e);
                    report.unresolved.push(intent);
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.unresolved_intents.set(report.unresolved.len() as i64);
        }
        if !report.unresolved.is_empty() {
            warn!(count = report.unresolved.len(), "claim intents still unresolved");
        }
        Ok(report)
    }

    /// Operator override: forget an unresolved intent so the address can claim
    /// again. Returns whether one existed.
    pub async fn abandon_intent(&self, address: &Address) -> Result<bool, StorageError> {
        let _guard = self.locks.acquire(*address).await;
        let existed = self.intents.pending_intent(address).await?.is_some();
        if existed {
            self.intents.clear_intent(address).await?;
            warn!(%address, "claim intent abandoned by operator");
            self.refresh_unresolved_gauge().await;
        }
        Ok(existed)
    }

    pub async fn unresolved_intents(&self) -> Result<Vec<ClaimIntent>, StorageError> {
        self.intents.pending_intents().await
    }
}

/// Time left before `last` falls out of the cooldown window, if any. A
/// timestamp ahead of `now` counts as a claim made right now.
fn remaining_cooldown(cooldown: Duration, last: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
    cooldown.checked_sub(elapsed).filter(|left| !left.is_zero())
}

fn storage_unavailable(address: &Address, err: StorageError) -> ClaimOutcome {
    warn!(%address, "ledger unavailable before transfer: {}", err);
    ClaimOutcome::TransferFailed(FailureReason::Storage(err.to_string()))
}
