//! Faucet service: wires configuration, ledger, submitter and coordinator.

use crate::chain::{signing_key_from_hex, ChainSubmitter, RpcChainSubmitter, SubmitterSettings, TransferStatus};
use crate::clock::{Clock, SystemClock};
use crate::config::FaucetConfig;
use crate::coordinator::{ClaimCoordinator, ClaimOutcome, CoordinatorSettings, ReconcileReport};
use crate::error::{FaucetError, FaucetResult};
use crate::ledger::{ClaimLedger, SledLedger};
use crate::metrics::FaucetMetrics;
use crate::rpc::BlockchainRpcClient;
use drip_common::types::{Address, TxHash};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Faucet service
pub struct FaucetService {
    config: FaucetConfig,
    ledger: Arc<SledLedger>,
    submitter: Arc<dyn ChainSubmitter>,
    coordinator: Arc<ClaimCoordinator>,
    metrics: FaucetMetrics,
}

impl FaucetService {
    /// Create the service against the configured node and database.
    pub fn new(config: FaucetConfig) -> FaucetResult<Self> {
        config.validate()?;

        let ledger = Arc::new(SledLedger::open(&config.db_path)?);
        let rpc = Arc::new(BlockchainRpcClient::new(config.rpc_url.clone())?);
        let signing_key = signing_key_from_hex(&config.private_key)?;
        let settings = SubmitterSettings {
            chain_id: config.chain_id,
            gas_price: config.gas_price_wei()?,
            gas_limit: config.gas_limit,
            confirmation_timeout: config.confirmation_timeout(),
            poll_interval: config.receipt_poll_interval(),
            max_poll_failures: config.max_poll_failures,
        };
        let submitter = Arc::new(RpcChainSubmitter::new(rpc, signing_key, settings));

        Self::from_parts(config, ledger, submitter, Arc::new(SystemClock))
    }

    /// Assemble from already-built collaborators.
    pub fn from_parts(
        config: FaucetConfig,
        ledger: Arc<SledLedger>,
        submitter: Arc<dyn ChainSubmitter>,
        clock: Arc<dyn Clock>,
    ) -> FaucetResult<Self> {
        let metrics = FaucetMetrics::new().map_err(|e| FaucetError::Internal(e.to_string()))?;
        let settings = CoordinatorSettings {
            cooldown: config.address_cooldown_duration(),
            amount: config.dispense_amount_wei()?,
        };
        let coordinator = ClaimCoordinator::new(
            ledger.clone(),
            ledger.clone(),
            submitter.clone(),
            clock,
            settings,
        )
        .with_metrics(metrics.clone());

        info!(
            "Faucet ready: {} wei per claim, cooldown {}s",
            config.dispense_amount, config.address_cooldown_secs
        );

        Ok(Self {
            config,
            ledger,
            submitter,
            coordinator: Arc::new(coordinator),
            metrics,
        })
    }

    pub async fn claim(&self, wallet_address: &str) -> ClaimOutcome {
        self.coordinator.claim(wallet_address).await
    }

    pub async fn reconcile(&self) -> FaucetResult<ReconcileReport> {
        Ok(self.coordinator.reconcile().await?)
    }

    pub async fn abandon_intent(&self, address: &Address) -> FaucetResult<bool> {
        Ok(self.coordinator.abandon_intent(address).await?)
    }

    /// Get faucet status
    pub async fn status(&self) -> FaucetResult<FaucetStatus> {
        let balance = self.submitter.balance().await?;

        Ok(FaucetStatus {
            address: self.submitter.sender().to_checksum(),
            balance: balance.to_string(),
            dispense_amount: self.coordinator.settings().amount.to_string(),
            cooldown_secs: self.coordinator.settings().cooldown.as_secs(),
            claims_recorded: self.ledger.claim_count().await?,
            unresolved_intents: self.coordinator.unresolved_intents().await?.len(),
            claims_in_flight: self.coordinator.in_flight(),
        })
    }

    pub async fn transaction_status(&self, tx_hash: &str) -> FaucetResult<TransactionStatus> {
        let tx_hash: TxHash = tx_hash
            .parse()
            .map_err(|e| FaucetError::InvalidTxHash(format!("{}: {}", tx_hash, e)))?;
        let status = self.submitter.status(&tx_hash).await?;
        Ok(TransactionStatus { tx_hash, status })
    }

    pub fn metrics(&self) -> &FaucetMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &FaucetConfig {
        &self.config
    }

    pub async fn flush(&self) -> FaucetResult<()> {
        Ok(self.ledger.flush().await?)
    }
}

/// Faucet status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaucetStatus {
    pub address: String,
    pub balance: String,
    pub dispense_amount: String,
    pub cooldown_secs: u64,
    pub claims_recorded: usize,
    pub unresolved_intents: usize,
    pub claims_in_flight: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatus {
    pub tx_hash: TxHash,
    pub status: TransferStatus,
}
