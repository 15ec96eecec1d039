use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub bind_address: String,
    pub solana_rpc_url: String,
    pub ledger_api_url: String,
    pub ledger_api_key: Option<String>,
    pub aggregator_api_url: String,
    pub aggregator_token_url: String,
    pub aggregator_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Ok(Self {
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            solana_rpc_url: std::env::var("SOLANA_RPC_URL")
                .unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".to_string()),
            ledger_api_url: std::env::var("LEDGER_API_URL")
                .unwrap_or_else(|_| "https://api.shadowpay.network".to_string()),
            ledger_api_key: std::env::var("LEDGER_API_KEY").ok(),
            aggregator_api_url: std::env::var("AGGREGATOR_API_URL")
                .unwrap_or_else(|_| "https://api.jup.ag/swap/v1".to_string()),
            aggregator_token_url: std::env::var("AGGREGATOR_TOKEN_URL")
                .unwrap_or_else(|_| "https://token.jup.ag/strict".to_string()),
            aggregator_api_key: std::env::var("AGGREGATOR_API_KEY").ok(),
        })
    }
}
