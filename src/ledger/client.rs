use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{AppResult, LedgerError};

pub const NATIVE_TOKEN: &str = "SOL";

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerBalance {
    /// Smallest-unit balance available for settlement
    pub available: u64,
    #[serde(default)]
    pub pool_address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProofUpload {
    pub sender_wallet: String,
    pub token: String,
    pub amount: u64,
    /// Seconds-resolution unix timestamp. The ledger rejects
    /// millisecond values that overflow its expected u32 range.
    pub nonce: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProofReceipt {
    /// Settlement nonce to carry into the external-transfer call.
    /// Distinct from both the proof nonce and the signing nonce.
    pub nonce: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExternalTransferRequest {
    pub sender_wallet: String,
    pub recipient_wallet: String,
    pub token: String,
    /// Settlement nonce echoed back by the proof step
    pub nonce: u64,
    pub relayer_fee: u64,
    pub sender_signature: String,
    pub signature_message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferReceipt {
    pub tx_signature: String,
}

#[derive(Debug, Clone, Deserialize)]
struct UnsignedTxResponse {
    #[serde(default)]
    unsigned_tx_base64: Option<String>,
    #[serde(default)]
    transaction: Option<String>,
}

impl UnsignedTxResponse {
    fn into_blob(self) -> Result<String, LedgerError> {
        self.unsigned_tx_base64
            .or(self.transaction)
            .ok_or_else(|| LedgerError::Rejected("No transaction in response".to_string()))
    }
}

/// External shielded-ledger service seam
#[async_trait]
pub trait ShieldedLedger: Send + Sync {
    async fn get_balance(&self, wallet: &str, api_key: Option<&str>) -> AppResult<LedgerBalance>;

    async fn upload_proof(&self, request: &ProofUpload) -> AppResult<ProofReceipt>;

    async fn external_transfer(
        &self,
        request: &ExternalTransferRequest,
    ) -> AppResult<TransferReceipt>;

    /// Unsigned deposit transaction (base64) for client-side signing
    async fn build_deposit(&self, wallet: &str, amount: u64) -> AppResult<String>;

    /// Unsigned withdraw transaction (base64) destined for the sender's
    /// own wallet
    async fn build_withdraw(&self, wallet: &str, amount: u64) -> AppResult<String>;
}

/// HTTP client for the shielded-ledger service. Owned and injected by
/// the caller; `ensure_ready` performs one-time handshake work behind a
/// single-flight cell so a failed initialization is retried on the next
/// use instead of being cached as fatal.
pub struct ShieldClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    ready: OnceCell<()>,
}

impl ShieldClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
            ready: OnceCell::new(),
        }
    }

    pub async fn ensure_ready(&self) -> AppResult<()> {
        self.ready
            .get_or_try_init(|| async {
                let url = format!("{}/api/v1/health", self.base_url);
                debug!("Initializing shielded-ledger client: {}", url);

                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| LedgerError::Init(e.to_string()))?;

                if !response.status().is_success() {
                    return Err(LedgerError::Init(format!(
                        "Ledger health check returned {}",
                        response.status()
                    )));
                }

                info!("✓ Shielded-ledger client ready");
                Ok::<(), LedgerError>(())
            })
            .await?;
        Ok(())
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }
        builder
    }

    /// Surface the upstream rejection body verbatim
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, LedgerError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);

        if message.is_empty() {
            Err(LedgerError::Rejected(format!("Ledger returned {}", status)))
        } else {
            Err(LedgerError::Rejected(message))
        }
    }
}

#[async_trait]
impl ShieldedLedger for ShieldClient {
    async fn get_balance(&self, wallet: &str, api_key: Option<&str>) -> AppResult<LedgerBalance> {
        self.ensure_ready().await?;

        let url = format!(
            "{}/api/v1/balance/{}?token={}",
            self.base_url, wallet, NATIVE_TOKEN
        );
        let mut builder = self.request(reqwest::Method::GET, url);
        // A caller-supplied key scopes the read to that account
        if let Some(key) = api_key {
            builder = builder.header("x-api-key", key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        let response = Self::check(response).await?;

        let balance: LedgerBalance = response
            .json()
            .await
            .map_err(|e| LedgerError::Rejected(format!("Malformed balance response: {}", e)))?;
        Ok(balance)
    }

    async fn upload_proof(&self, request: &ProofUpload) -> AppResult<ProofReceipt> {
        self.ensure_ready().await?;

        let url = format!("{}/api/v1/proof/upload", self.base_url);
        let response = self
            .request(reqwest::Method::POST, url)
            .json(request)
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        let response = Self::check(response).await?;

        let receipt: ProofReceipt = response
            .json()
            .await
            .map_err(|e| LedgerError::Rejected(format!("Malformed proof response: {}", e)))?;
        Ok(receipt)
    }

    async fn external_transfer(
        &self,
        request: &ExternalTransferRequest,
    ) -> AppResult<TransferReceipt> {
        self.ensure_ready().await?;

        let url = format!("{}/api/v1/transfer/external", self.base_url);
        let response = self
            .request(reqwest::Method::POST, url)
            .json(request)
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        let response = Self::check(response).await?;

        let receipt: TransferReceipt = response
            .json()
            .await
            .map_err(|e| LedgerError::Rejected(format!("Malformed transfer response: {}", e)))?;
        Ok(receipt)
    }

    async fn build_deposit(&self, wallet: &str, amount: u64) -> AppResult<String> {
        self.ensure_ready().await?;

        let url = format!("{}/api/v1/deposit", self.base_url);
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&serde_json::json!({
                "wallet": wallet,
                "amount": amount,
                "token": NATIVE_TOKEN,
            }))
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        let response = Self::check(response).await?;

        let body: UnsignedTxResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Rejected(format!("Malformed deposit response: {}", e)))?;
        Ok(body.into_blob()?)
    }

    async fn build_withdraw(&self, wallet: &str, amount: u64) -> AppResult<String> {
        self.ensure_ready().await?;

        let url = format!("{}/api/v1/withdraw", self.base_url);
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&serde_json::json!({
                "wallet": wallet,
                "amount": amount,
                "token": NATIVE_TOKEN,
            }))
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        let response = Self::check(response).await?;

        let body: UnsignedTxResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Rejected(format!("Malformed withdraw response: {}", e)))?;
        Ok(body.into_blob()?)
    }
}
