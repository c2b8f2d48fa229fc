//! Hourly token faucet.
//!
//! Dispenses a fixed amount of the chain's native token to a wallet at most
//! once per cooldown window, from a single custodial signing key:
//! - Address validation with EIP-55 checksums
//! - Per-address claim serialization with eligibility re-checked under the lock
//! - Serialized nonce management for the signing identity
//! - Durable claim ledger with a write-ahead intent log and reconciliation
//! - Prometheus metrics and an HTTP interface

pub mod api;
pub mod chain;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod metrics;
pub mod rpc;
pub mod service;

pub use chain::{ChainSubmitter, Confirmation, RpcChainSubmitter, SubmitterSettings, TransferStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::FaucetConfig;
pub use coordinator::{
    ClaimCoordinator, ClaimOutcome, CoordinatorSettings, FailureReason, IndeterminateReason,
    ReconcileReport,
};
pub use error::{FaucetError, FaucetResult, RpcError, StorageError, SubmitError};
pub use ledger::{ClaimIntent, ClaimLedger, ClaimRecord, IntentLog, SledLedger};
pub use service::{FaucetService, FaucetStatus, TransactionStatus};
