//! Faucet configuration

use crate::coordinator::DEFAULT_COOLDOWN;
use crate::error::{FaucetError, FaucetResult};
use drip_common::utils::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 10 whole tokens at 18 decimals.
pub const DEFAULT_DISPENSE_AMOUNT: &str = "10000000000000000000";

/// Faucet service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaucetConfig {
    /// Server address
    pub server_addr: String,

    /// RPC endpoint for blockchain
    pub rpc_url: String,

    /// Faucet account private key
    pub private_key: String,

    /// Chain id used for EIP-155 signing; queried from the node when unset
    pub chain_id: Option<u64>,

    /// Amount to dispense per claim (in wei)
    pub dispense_amount: String,

    /// Cooldown period between claims for the same address (seconds)
    pub address_cooldown_secs: u64,

    /// Gas price to use (in wei); the node's quote is used when unset
    pub gas_price: Option<String>,

    /// Gas limit for transactions
    pub gas_limit: u64,

    /// Upper bound on waiting for a receipt after broadcast (seconds)
    pub confirmation_timeout_secs: u64,

    /// Delay between receipt polls (milliseconds)
    pub receipt_poll_interval_ms: u64,

    /// Consecutive failed receipt polls tolerated before giving up
    pub max_poll_failures: u32,

    /// How often unresolved claim intents are re-examined (seconds)
    pub reconcile_interval_secs: u64,

    /// Database path
    pub db_path: String,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Enable metrics
    pub metrics_enabled: bool,

    pub logging: LoggingConfig,
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:3000".to_string(),
            rpc_url: "http://localhost:8545".to_string(),
            private_key: String::new(),
            chain_id: None,
            dispense_amount: DEFAULT_DISPENSE_AMOUNT.to_string(),
            address_cooldown_secs: DEFAULT_COOLDOWN.as_secs(),
            gas_price: None,
            gas_limit: 21000,
            confirmation_timeout_secs: 120,
            receipt_poll_interval_ms: 1000,
            max_poll_failures: 5,
            reconcile_interval_secs: 300,
            db_path: "./faucet_data".to_string(),
            cors_enabled: true,
            metrics_enabled: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl FaucetConfig {
    /// Defaults, then the optional config file, then `FAUCET_*` variables.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        drip_common::utils::config::load_layered(path, "FAUCET")
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> FaucetResult<()> {
        if self.private_key.trim().is_empty() {
            return Err(FaucetError::Config("private_key is required".to_string()));
        }
        let amount = self.dispense_amount_wei()?;
        if amount == 0 {
            return Err(FaucetError::Config("dispense_amount must be positive".to_string()));
        }
        self.gas_price_wei()?;
        let intervals = [
            ("receipt_poll_interval_ms", self.receipt_poll_interval_ms),
            ("confirmation_timeout_secs", self.confirmation_timeout_secs),
            ("reconcile_interval_secs", self.reconcile_interval_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(FaucetError::Config(format!("{} must be positive", name)));
        }
        Ok(())
    }

    pub fn dispense_amount_wei(&self) -> FaucetResult<u128> {
        self.dispense_amount.trim().parse::<u128>().map_err(|e| {
            FaucetError::Config(format!("invalid dispense_amount {:?}: {}", self.dispense_amount, e))
        })
    }

    pub fn gas_price_wei(&self) -> FaucetResult<Option<u128>> {
        self.gas_price
            .as_deref()
            .map(|price| {
                price.trim().parse::<u128>().map_err(|e| {
                    FaucetError::Config(format!("invalid gas_price {:?}: {}", price, e))
                })
            })
            .transpose()
    }

    /// Get address cooldown duration
    pub fn address_cooldown_duration(&self) -> Duration {
        Duration::from_secs(self.address_cooldown_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}
