//! HTTP API for faucet service

use crate::coordinator::ClaimOutcome;
use crate::error::FaucetResult;
use crate::service::{FaucetService, FaucetStatus, TransactionStatus};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Claim request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub wallet_address: String,
}

/// Success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T> {
    pub data: T,
    pub timestamp: String,
}

impl<T> SuccessResponse<T> {
    fn new(data: T) -> Self {
        Self {
            data,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Routes served by the faucet binary.
pub fn router(service: Arc<FaucetService>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/faucet", post(claim_handler))
        .route("/api/status", get(status_handler))
        .route("/api/transactions/:hash", get(transaction_handler))
        .with_state(service)
}

fn retry_after_secs(retry_after: Duration) -> u64 {
    retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0)
}

impl IntoResponse for ClaimOutcome {
    fn into_response(self) -> Response {
        let timestamp = chrono::Utc::now().to_rfc3339();
        match self {
            ClaimOutcome::Claimed { tx_hash } => (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "txHash": tx_hash,
                    "timestamp": timestamp
                })),
            )
                .into_response(),
            ClaimOutcome::RateLimited { retry_after } => {
                let secs = retry_after_secs(retry_after);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, secs.to_string())],
                    Json(json!({
                        "success": false,
                        "error": "RATE_LIMITED",
                        "message": format!("Address already claimed recently. Try again in {} seconds", secs),
                        "retryAfterSecs": secs,
                        "timestamp": timestamp
                    })),
                )
                    .into_response()
            }
            ClaimOutcome::InvalidAddress(msg) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "error": "INVALID_ADDRESS",
                    "message": format!("Invalid wallet address: {}", msg),
                    "timestamp": timestamp
                })),
            )
                .into_response(),
            ClaimOutcome::TransferFailed(reason) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": reason.code(),
                    "message": reason.to_string(),
                    "timestamp": timestamp
                })),
            )
                .into_response(),
            ClaimOutcome::Indeterminate { tx_hash, reason, detail } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": reason.code(),
                    "message": format!("Transfer outcome unknown, pending manual reconciliation: {}", detail),
                    "txHash": tx_hash,
                    "timestamp": timestamp
                })),
            )
                .into_response(),
        }
    }
}

/// Claim handler
pub async fn claim_handler(
    State(service): State<Arc<FaucetService>>,
    Json(request): Json<ClaimRequest>,
) -> Response {
    info!("Claim request: address={}", request.wallet_address);
    service.claim(request.wallet_address.trim()).await.into_response()
}

/// Status handler
pub async fn status_handler(
    State(service): State<Arc<FaucetService>>,
) -> FaucetResult<Json<SuccessResponse<FaucetStatus>>> {
    let status = service.status().await?;
    Ok(Json(SuccessResponse::new(status)))
}

pub async fn transaction_handler(
    State(service): State<Arc<FaucetService>>,
    Path(hash): Path<String>,
) -> FaucetResult<Json<SuccessResponse<TransactionStatus>>> {
    let status = service.transaction_status(&hash).await?;
    Ok(Json(SuccessResponse::new(status)))
}

pub async fn metrics_handler(State(service): State<Arc<FaucetService>>) -> Response {
    if !service.config().metrics_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.metrics().render(),
    )
        .into_response()
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Root handler with info
pub async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "name": "Drip Faucet",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "POST /faucet": "Claim tokens ({\"walletAddress\": \"0x...\"})",
            "GET /api/status": "Get faucet status",
            "GET /api/transactions/:hash": "Get transfer status",
            "GET /health": "Health check",
            "GET /metrics": "Prometheus metrics"
        }
    }))
}
