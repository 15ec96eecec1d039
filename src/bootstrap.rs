use std::sync::Arc;
use tracing::info;

use crate::{
    aggregator::client::{JupiterClient, SwapAggregator},
    aggregator::tokens::TokenCache,
    api::handlers::AppState,
    config::Config,
    error::AppResult,
    execution::rpc::{SolanaConfig, SolanaRpc, WalletRpc},
    ledger::client::{ShieldClient, ShieldedLedger},
    ledger::reconciler::Reconciler,
    locks::AccountLocks,
    swap::funding::FundingPolicy,
    swap::pipeline::SwapPipeline,
    transfer::protocol::TransferProtocol,
    wallet::repository::{AccountRepository, TransactionRepository},
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    // External collaborators, owned here and injected everywhere
    let rpc: Arc<dyn WalletRpc> = Arc::new(SolanaRpc::new(SolanaConfig {
        rpc_url: config.solana_rpc_url.clone(),
        ..SolanaConfig::default()
    }));
    info!("✅ Wallet RPC client configured: {}", config.solana_rpc_url);

    let ledger: Arc<dyn ShieldedLedger> = Arc::new(ShieldClient::new(
        config.ledger_api_url.clone(),
        config.ledger_api_key.clone(),
    ));
    info!(
        "✅ Shielded-ledger client configured: {}",
        config.ledger_api_url
    );

    let aggregator: Arc<dyn SwapAggregator> = Arc::new(JupiterClient::new(
        config.aggregator_api_url.clone(),
        config.aggregator_token_url.clone(),
        config.aggregator_api_key.clone(),
    ));
    info!(
        "✅ Swap aggregator configured: {}",
        config.aggregator_api_url
    );

    // Repositories and process-wide state
    let accounts = Arc::new(AccountRepository::new());
    let records = Arc::new(TransactionRepository::new());
    let tokens = Arc::new(TokenCache::hourly(aggregator.clone()));
    let locks = Arc::new(AccountLocks::new());

    // Core services
    let protocol = Arc::new(TransferProtocol::new(ledger.clone(), accounts.clone()));
    let reconciler = Arc::new(Reconciler::new(ledger.clone(), accounts.clone()));
    let funding = Arc::new(FundingPolicy::new(rpc.clone(), protocol.clone()));
    let pipeline = Arc::new(SwapPipeline::new(
        rpc,
        aggregator,
        funding,
        accounts.clone(),
        records.clone(),
        tokens.clone(),
        locks.clone(),
    ));
    info!("✅ Settlement pipeline initialized");

    // Warm the token cache in the background; a failure here just means
    // the first request pays for the fetch
    let warmup = tokens.clone();
    tokio::spawn(async move {
        let entries = warmup.get().await;
        info!("Token cache warmed: {} entries", entries.len());
    });

    Ok(AppState {
        accounts,
        records,
        ledger,
        reconciler,
        protocol,
        pipeline,
        tokens,
        locks,
    })
}
