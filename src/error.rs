use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Funding failed: {0}")]
    Funding(String),

    #[error("Transaction failed on chain: {0}")]
    OnChain(String),

    #[error("Shielded ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Aggregator error: {0}")]
    Aggregator(#[from] AggregatorError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Shielded-ledger service errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger initialization failed: {0}")]
    Init(String),

    #[error("Shielded ledger unreachable: {0}")]
    Unavailable(String),

    // Upstream rejection body, surfaced verbatim
    #[error("{0}")]
    Rejected(String),
}

/// Swap-aggregator service errors
#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("No quote found")]
    NoQuote,

    #[error("No swap transaction returned")]
    NoSwapTransaction,

    #[error("Aggregator unreachable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Rejected(String),
}

/// Transfer-authorization protocol errors
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Invalid signature format: {0}")]
    InvalidSignature(String),

    #[error("Signature message does not match this authorization")]
    NonceMismatch,

    #[error("Malformed transfer message: {0}")]
    MalformedMessage(String),

    #[error("Proof generation failed: {0}")]
    ProofUpload(String),

    #[error("External transfer failed: {0}")]
    Settlement(String),
}

/// Wallet RPC provider errors
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("RPC request failed: {0}")]
    Client(String),

    #[error("Transaction confirmation timed out")]
    ConfirmationTimeout,

    #[error("Invalid transaction payload: {0}")]
    InvalidTransaction(String),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Funding(msg) => (StatusCode::BAD_REQUEST, "FUNDING_FAILED", msg.clone()),
            AppError::OnChain(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ONCHAIN_FAILURE",
                format!("Transaction failed on chain: {}", msg),
            ),
            AppError::Transfer(
                TransferError::InvalidSignature(_)
                | TransferError::NonceMismatch
                | TransferError::MalformedMessage(_),
            ) => (
                StatusCode::BAD_REQUEST,
                "AUTHORIZATION_FAILED",
                self.to_string(),
            ),
            AppError::Transfer(e) => (StatusCode::BAD_GATEWAY, "SETTLEMENT_FAILED", e.to_string()),
            AppError::Ledger(e) => (StatusCode::BAD_GATEWAY, "LEDGER_ERROR", e.to_string()),
            AppError::Aggregator(AggregatorError::NoQuote) => (
                StatusCode::BAD_GATEWAY,
                "NO_QUOTE",
                AggregatorError::NoQuote.to_string(),
            ),
            AppError::Aggregator(e) => (StatusCode::BAD_GATEWAY, "AGGREGATOR_ERROR", e.to_string()),
            AppError::Rpc(RpcError::ConfirmationTimeout) => (
                StatusCode::GATEWAY_TIMEOUT,
                "CONFIRMATION_TIMEOUT",
                self.to_string(),
            ),
            AppError::Rpc(e) => (StatusCode::BAD_GATEWAY, "RPC_ERROR", e.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details: None,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::Validation(format!("Decimal conversion error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
