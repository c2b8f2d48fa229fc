//! Error types for the faucet service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use drip_common::types::TxHash;
use serde_json::json;
use thiserror::Error;

/// Claim ledger failures.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Corrupt record: {0}")]
    Codec(String),

    #[error("Storage task failed: {0}")]
    Task(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Codec(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Task(err.to_string())
    }
}

/// JSON-RPC transport and protocol failures.
#[derive(Error, Debug)]
pub enum RpcError {
    /// The request never produced a response. `delivered` is false only when
    /// the connection itself could not be established.
    #[error("RPC transport error: {message}")]
    Transport { message: String, delivered: bool },

    #[error("RPC node error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        RpcError::Transport {
            delivered: !err.is_connect() && !err.is_builder(),
            message: err.to_string(),
        }
    }
}

/// Chain submitter failures, classified by what is known about the funds.
#[derive(Error, Debug)]
pub enum SubmitError {
    /// Destination refused before anything was signed.
    #[error("Invalid destination: {0}")]
    InvalidAddress(String),

    /// Nothing was broadcast; safe to retry.
    #[error("Submission failed: {0}")]
    Submission(String),

    /// The broadcast request may have reached the node but no answer came back.
    #[error("Broadcast of {tx_hash} unacknowledged: {reason}")]
    BroadcastUnacknowledged { tx_hash: TxHash, reason: String },

    /// Broadcast accepted, confirmation never observed.
    #[error("Confirmation of {tx_hash} timed out: {reason}")]
    ConfirmationTimeout { tx_hash: TxHash, reason: String },

    /// Included on-chain but execution failed; no value moved.
    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: TxHash },
}

/// Faucet service errors
#[derive(Error, Debug)]
pub enum FaucetError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Invalid transaction hash: {0}")]
    InvalidTxHash(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for FaucetError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            FaucetError::InvalidTxHash(_) => (StatusCode::BAD_REQUEST, "INVALID_TX_HASH"),
            FaucetError::Rpc(_) => (StatusCode::BAD_GATEWAY, "RPC_ERROR"),
            FaucetError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            FaucetError::Config(_) | FaucetError::InvalidKey(_) | FaucetError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let body = Json(json!({
            "error": error_code,
            "message": self.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));

        (status, body).into_response()
    }
}

pub type FaucetResult<T> = Result<T, FaucetError>;
