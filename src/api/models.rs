use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ========== REQUEST MODELS ==========

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub recipient_address: String,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfirmRequest {
    pub recipient_address: String,
    pub amount: Decimal,
    pub nonce: String,
    pub signature: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRequest {
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub wallet_address: String,
    /// Base58 keypair for the account's execution wallet
    #[serde(default)]
    pub execution_wallet_secret: Option<String>,
}

/// Record an externally executed swap
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    pub amount: Decimal,
    pub from_token_symbol: String,
    pub to_token_symbol: String,
    pub tx_hash: String,
    #[serde(default)]
    pub input_mint: Option<String>,
    #[serde(default)]
    pub output_mint: Option<String>,
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureData {
    pub message: String,
    pub nonce: String,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferInitiateResponse {
    pub success: bool,
    pub message: String,
    pub requires_signature: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsigned_tx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_data: Option<SignatureData>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfirmResponse {
    pub success: bool,
    pub message: String,
    pub tx_hash: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositResponse {
    pub success: bool,
    pub unsigned_tx: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub private_balance: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_address: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub wallet_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_wallet_address: Option<String>,
    pub api_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}
