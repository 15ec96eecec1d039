use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{AggregatorError, AppResult};

#[derive(Debug, Clone)]
pub struct QuoteParams {
    pub input_mint: String,
    pub output_mint: String,
    /// Smallest-unit amount
    pub amount: u64,
    pub slippage_bps: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub address: String,
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    pub decimals: u8,
    #[serde(rename = "logoURI", default)]
    pub logo_uri: Option<String>,
}

/// External swap-aggregator seam. The quote object is opaque - it is
/// fetched, carried, and handed back to the transaction-construction
/// endpoint without interpretation.
#[async_trait]
pub trait SwapAggregator: Send + Sync {
    /// `None` when the aggregator has no route for the pair
    async fn quote(&self, params: &QuoteParams) -> AppResult<Option<Value>>;

    /// Build an unsigned swap transaction (base64 blob) from a quote,
    /// with the given wallet as source and fee payer
    async fn build_swap(&self, quote: &Value, user_public_key: &str) -> AppResult<String>;

    async fn token_list(&self) -> AppResult<Vec<TokenMetadata>>;
}

pub struct JupiterClient {
    client: Client,
    base_url: String,
    token_url: String,
    api_key: Option<String>,
}

impl JupiterClient {
    pub fn new(base_url: String, token_url: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            token_url,
            api_key,
        }
    }

    fn with_key(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, AggregatorError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);

        if message.is_empty() {
            Err(AggregatorError::Rejected(format!(
                "Aggregator returned {}",
                status
            )))
        } else {
            Err(AggregatorError::Rejected(message))
        }
    }
}

#[async_trait]
impl SwapAggregator for JupiterClient {
    async fn quote(&self, params: &QuoteParams) -> AppResult<Option<Value>> {
        let url = format!(
            "{}/quote?inputMint={}&outputMint={}&amount={}&slippageBps={}",
            self.base_url, params.input_mint, params.output_mint, params.amount,
            params.slippage_bps
        );
        debug!("Fetching quote: {}", url);

        let response = self
            .with_key(self.client.get(&url))
            .send()
            .await
            .map_err(|e| AggregatorError::Unavailable(e.to_string()))?;
        let response = Self::check(response).await?;

        let quote: Value = response
            .json()
            .await
            .map_err(|e| AggregatorError::Rejected(format!("Malformed quote response: {}", e)))?;

        if quote.is_null() {
            return Ok(None);
        }
        Ok(Some(quote))
    }

    async fn build_swap(&self, quote: &Value, user_public_key: &str) -> AppResult<String> {
        let url = format!("{}/swap", self.base_url);
        let payload = serde_json::json!({
            "quoteResponse": quote,
            "userPublicKey": user_public_key,
            "wrapAndUnwrapSol": true,
            "asLegacyTransaction": false,
            "dynamicComputeUnitLimit": true,
            "dynamicSlippage": true,
        });

        let response = self
            .with_key(self.client.post(&url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| AggregatorError::Unavailable(e.to_string()))?;
        let response = Self::check(response).await?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| AggregatorError::Rejected(format!("Malformed swap response: {}", e)))?;

        body.get("swapTransaction")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| AggregatorError::NoSwapTransaction.into())
    }

    async fn token_list(&self) -> AppResult<Vec<TokenMetadata>> {
        let response = self
            .client
            .get(&self.token_url)
            .send()
            .await
            .map_err(|e| AggregatorError::Unavailable(e.to_string()))?;
        let response = Self::check(response).await?;

        let tokens: Vec<TokenMetadata> = response
            .json()
            .await
            .map_err(|e| AggregatorError::Rejected(format!("Malformed token list: {}", e)))?;
        Ok(tokens)
    }
}
