use async_trait::async_trait;
use solana_client::{nonblocking::rpc_client::RpcClient, rpc_config::RpcSendTransactionConfig};
use solana_commitment_config::CommitmentConfig;
use solana_sdk::{
    hash::Hash, pubkey::Pubkey, signature::Signature, transaction::VersionedTransaction,
};
use std::time::Duration;
use tracing::debug;

use crate::error::{AppResult, RpcError};

#[derive(Debug, Clone)]
pub struct SolanaConfig {
    pub rpc_url: String,
    pub commitment: CommitmentConfig,
    /// Client-side retransmissions for broadcast; preflight is skipped.
    pub max_retries: usize,
    pub confirmation_timeout: Duration,
}

impl Default for SolanaConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            commitment: CommitmentConfig::confirmed(),
            max_retries: 2,
            confirmation_timeout: Duration::from_secs(60),
        }
    }
}

/// Outcome of a bounded confirmation wait. A timeout is surfaced as
/// [`RpcError::ConfirmationTimeout`], not as an outcome - the caller
/// decides whether indeterminate means failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    FailedOnChain(String),
}

/// Wallet RPC provider seam
#[async_trait]
pub trait WalletRpc: Send + Sync {
    /// Balance in smallest units (lamports)
    async fn get_balance(&self, address: &Pubkey) -> AppResult<u64>;

    async fn get_latest_blockhash(&self) -> AppResult<Hash>;

    /// Broadcast a signed transaction, skipping preflight simulation
    async fn send_transaction(&self, transaction: &VersionedTransaction)
        -> AppResult<Signature>;

    /// Await confirmation for a bounded time
    async fn confirm_transaction(&self, signature: &Signature) -> AppResult<ConfirmOutcome>;
}

pub struct SolanaRpc {
    config: SolanaConfig,
    client: RpcClient,
}

impl SolanaRpc {
    pub fn new(config: SolanaConfig) -> Self {
        let client = RpcClient::new_with_commitment(config.rpc_url.clone(), config.commitment);
        Self { config, client }
    }
}

#[async_trait]
impl WalletRpc for SolanaRpc {
    async fn get_balance(&self, address: &Pubkey) -> AppResult<u64> {
        let balance = self
            .client
            .get_balance(address)
            .await
            .map_err(|e| RpcError::Client(format!("Failed to get balance: {}", e)))?;
        Ok(balance)
    }

    async fn get_latest_blockhash(&self) -> AppResult<Hash> {
        let blockhash = self
            .client
            .get_latest_blockhash()
            .await
            .map_err(|e| RpcError::Client(format!("Failed to get blockhash: {}", e)))?;
        Ok(blockhash)
    }

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
    ) -> AppResult<Signature> {
        let signature = self
            .client
            .send_transaction_with_config(
                transaction,
                RpcSendTransactionConfig {
                    skip_preflight: true,
                    max_retries: Some(self.config.max_retries),
                    ..RpcSendTransactionConfig::default()
                },
            )
            .await
            .map_err(|e| RpcError::Client(format!("Send failed: {}", e)))?;

        Ok(signature)
    }

    async fn confirm_transaction(&self, signature: &Signature) -> AppResult<ConfirmOutcome> {
        let start = std::time::Instant::now();

        loop {
            match self.client.get_signature_statuses(&[*signature]).await {
                Ok(response) => {
                    if let Some(Some(status)) = response.value.first() {
                        if let Some(err) = &status.err {
                            return Ok(ConfirmOutcome::FailedOnChain(format!("{:?}", err)));
                        }
                        if status.confirmation_status.is_some() {
                            return Ok(ConfirmOutcome::Confirmed);
                        }
                    }
                }
                Err(e) => {
                    // Transient status-API hiccups are retried until the deadline
                    debug!("Signature status lookup failed: {}", e);
                }
            }

            if start.elapsed() > self.config.confirmation_timeout {
                return Err(RpcError::ConfirmationTimeout.into());
            }

            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}
