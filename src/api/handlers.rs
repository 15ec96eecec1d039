use axum::{
    extract::{FromRequestParts, State},
    http::request::Parts,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::models::*;
use crate::{
    aggregator::client::TokenMetadata,
    aggregator::tokens::TokenCache,
    error::{AppError, AppResult},
    ledger::client::ShieldedLedger,
    ledger::reconciler::Reconciler,
    locks::AccountLocks,
    swap::pipeline::{SwapOutcome, SwapPipeline, SwapRequest},
    transfer::protocol::{to_lamports, SignedTransfer, TransferProtocol},
    wallet::models::{RecordStatus, ShieldedAccount, SwapDetails, TransactionRecord},
    wallet::repository::{AccountRepository, TransactionRepository},
};

#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<AccountRepository>,
    pub records: Arc<TransactionRepository>,
    pub ledger: Arc<dyn ShieldedLedger>,
    pub reconciler: Arc<Reconciler>,
    pub protocol: Arc<TransferProtocol>,
    pub pipeline: Arc<SwapPipeline>,
    pub tokens: Arc<TokenCache>,
    pub locks: Arc<AccountLocks>,
}

/// Caller identity, established by the upstream auth gateway and
/// forwarded as a header
pub struct AuthedWallet(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthedWallet
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-wallet-address")
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(|value| AuthedWallet(value.to_string()))
            .ok_or_else(|| AppError::Validation("Missing x-wallet-address header".to_string()))
    }
}

/// Execute a swap through the settlement pipeline
/// POST /api/swap/execute
pub async fn execute_swap(
    State(state): State<AppState>,
    AuthedWallet(wallet): AuthedWallet,
    Json(request): Json<SwapRequest>,
) -> AppResult<Json<SwapOutcome>> {
    info!("Swap request from {}: {}", wallet, request.amount);
    let outcome = state.pipeline.execute(&wallet, request).await?;
    Ok(Json(outcome))
}

/// GET /api/swap/tokens
pub async fn get_tokens(State(state): State<AppState>) -> Json<Vec<TokenMetadata>> {
    Json(state.tokens.get().await)
}

/// Record a swap that was executed outside the pipeline
/// POST /api/swap/notify
pub async fn notify_swap(
    State(state): State<AppState>,
    AuthedWallet(wallet): AuthedWallet,
    Json(request): Json<NotifyRequest>,
) -> AppResult<Json<NotifyResponse>> {
    let record = TransactionRecord::swap(
        wallet,
        request.amount,
        format!("{}-{}", request.from_token_symbol, request.to_token_symbol),
        request.tx_hash,
        RecordStatus::Completed,
        SwapDetails {
            protocol: "JUPITER".to_string(),
            input_mint: request.input_mint.unwrap_or_default(),
            output_mint: request.output_mint.unwrap_or_default(),
        },
    );
    state.records.save(record).await?;

    Ok(Json(NotifyResponse {
        message: "Swap recorded successfully".to_string(),
    }))
}

/// Initiate a private transfer. A self-transfer is a plain withdraw and
/// needs no authorization message; anything else starts the two-phase
/// signature flow.
/// POST /api/transfer
pub async fn initiate_transfer(
    State(state): State<AppState>,
    AuthedWallet(wallet): AuthedWallet,
    Json(request): Json<TransferRequest>,
) -> AppResult<Json<TransferInitiateResponse>> {
    info!(
        "Initiating private transfer: {} -> {} ({} SOL)",
        wallet, request.recipient_address, request.amount
    );

    if request.recipient_address == wallet {
        let amount = to_lamports(request.amount)?;
        let unsigned_tx = state.ledger.build_withdraw(&wallet, amount).await?;

        return Ok(Json(TransferInitiateResponse {
            success: true,
            message: "Withdraw transaction created".to_string(),
            requires_signature: false,
            unsigned_tx: Some(unsigned_tx),
            signature_data: None,
        }));
    }

    let authorization = state
        .protocol
        .prepare(&wallet, &request.recipient_address, request.amount)?;

    Ok(Json(TransferInitiateResponse {
        success: true,
        message: "Transfer initiated. Signature required.".to_string(),
        requires_signature: true,
        unsigned_tx: None,
        signature_data: Some(SignatureData {
            message: authorization.message,
            nonce: authorization.signing_nonce,
            timestamp: authorization.timestamp,
        }),
    }))
}

/// Finalize a signed transfer
/// POST /api/transfer/confirm
pub async fn confirm_transfer(
    State(state): State<AppState>,
    AuthedWallet(wallet): AuthedWallet,
    Json(request): Json<TransferConfirmRequest>,
) -> AppResult<Json<TransferConfirmResponse>> {
    info!(
        "Confirming transfer: {} -> {}",
        wallet, request.recipient_address
    );

    let account = state.accounts.get(&wallet).await?;

    // Same per-account serialization as the swap pipeline
    let _settlement_guard = state.locks.acquire(&wallet).await;

    let receipt = state
        .protocol
        .execute(
            &account,
            &SignedTransfer {
                recipient_address: request.recipient_address,
                amount: request.amount,
                signing_nonce: request.nonce,
                signature: request.signature,
                message: request.message,
            },
        )
        .await?;

    Ok(Json(TransferConfirmResponse {
        success: true,
        message: "Transfer successful".to_string(),
        tx_hash: receipt.tx_signature,
    }))
}

/// Build an unsigned shielded-deposit transaction
/// POST /api/deposit
pub async fn create_deposit(
    State(state): State<AppState>,
    AuthedWallet(wallet): AuthedWallet,
    Json(request): Json<DepositRequest>,
) -> AppResult<Json<DepositResponse>> {
    let amount = to_lamports(request.amount)?;
    let unsigned_tx = state.ledger.build_deposit(&wallet, amount).await?;

    Ok(Json(DepositResponse {
        success: true,
        unsigned_tx,
    }))
}

/// Reconciled shielded balance plus the deposit address
/// GET /api/balance
pub async fn get_balance(
    State(state): State<AppState>,
    AuthedWallet(wallet): AuthedWallet,
) -> AppResult<Json<BalanceResponse>> {
    let account = state.accounts.get(&wallet).await?;
    let private_balance = state.reconciler.reconcile(&account).await;

    Ok(Json(BalanceResponse {
        private_balance,
        deposit_address: account.execution_wallet_address,
    }))
}

/// Onboard an account and issue a scoped ledger credential
/// POST /api/account/register
pub async fn register_account(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> AppResult<Json<RegisterResponse>> {
    let mut account = ShieldedAccount::new(request.wallet_address.clone());
    if let Some(secret) = request.execution_wallet_secret {
        account = account.with_execution_secret(secret)?;
    }

    let api_key = format!("sp_live_{}", Uuid::new_v4().simple());
    account.api_key = Some(api_key.clone());
    let account = state.accounts.upsert(account).await?;

    info!("Registered account {}", account.wallet_address);

    Ok(Json(RegisterResponse {
        wallet_address: account.wallet_address,
        execution_wallet_address: account.execution_wallet_address,
        api_key,
    }))
}

/// GET /api/transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    AuthedWallet(wallet): AuthedWallet,
) -> AppResult<Json<Vec<TransactionRecord>>> {
    let records = state.records.find_by_user(&wallet).await?;
    Ok(Json(records))
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
    })
}
