use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use solana_sdk::signature::{Keypair, Signer};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// A user's shielded account. The cached balance is advisory only - the
/// external ledger service is the source of truth and the reconciler
/// resyncs on drift above [`crate::ledger::reconciler::DRIFT_EPSILON`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShieldedAccount {
    pub wallet_address: String,
    pub cached_balance: Decimal,
    /// Base58 keypair material for the execution wallet. Never logged,
    /// never serialized out of the process.
    #[serde(skip_serializing)]
    pub execution_wallet_secret: Option<String>,
    pub execution_wallet_address: Option<String>,
    /// Scoped credential for ledger balance reads.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ShieldedAccount {
    pub fn new(wallet_address: String) -> Self {
        Self {
            wallet_address,
            cached_balance: Decimal::ZERO,
            execution_wallet_secret: None,
            execution_wallet_address: None,
            api_key: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_execution_secret(mut self, secret: String) -> AppResult<Self> {
        let keypair = parse_keypair(&secret)?;
        self.execution_wallet_address = Some(keypair.pubkey().to_string());
        self.execution_wallet_secret = Some(secret);
        Ok(self)
    }

    /// Resolve the execution-wallet keypair, failing with a client error
    /// when no credential is configured.
    pub fn execution_keypair(&self) -> AppResult<Keypair> {
        let secret = self
            .execution_wallet_secret
            .as_deref()
            .ok_or_else(|| AppError::Validation("Internal wallet not configured".to_string()))?;
        parse_keypair(secret)
    }
}

fn parse_keypair(secret: &str) -> AppResult<Keypair> {
    let bytes = bs58::decode(secret)
        .into_vec()
        .map_err(|_| AppError::Validation("Execution wallet secret is not base58".to_string()))?;
    Keypair::try_from(bytes.as_slice())
        .map_err(|_| AppError::Validation("Execution wallet secret is not a keypair".to_string()))
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordKind {
    Swap,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Pending,
    Completed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SwapDetails {
    pub protocol: String,
    pub input_mint: String,
    pub output_mint: String,
}

/// Persisted settlement record. Written once per attempt that reaches
/// broadcast; immutable afterward.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub kind: RecordKind,
    pub wallet_address: String,
    pub amount: Decimal,
    pub token_pair: String,
    pub tx_hash: String,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub details: SwapDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl TransactionRecord {
    pub fn swap(
        wallet_address: String,
        amount: Decimal,
        token_pair: String,
        tx_hash: String,
        status: RecordStatus,
        details: SwapDetails,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: RecordKind::Swap,
            wallet_address,
            amount,
            token_pair,
            tx_hash,
            status,
            created_at: Utc::now(),
            details,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }
}
