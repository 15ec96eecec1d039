use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::api::handlers::{
    confirm_transfer, create_deposit, execute_swap, get_balance, get_tokens, health_check,
    initiate_transfer, list_transactions, notify_swap, register_account, AppState,
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api",
            Router::new()
                .route("/swap/execute", post(execute_swap))
                .route("/swap/tokens", get(get_tokens))
                .route("/swap/notify", post(notify_swap))
                .route("/transfer", post(initiate_transfer))
                .route("/transfer/confirm", post(confirm_transfer))
                .route("/deposit", post(create_deposit))
                .route("/balance", get(get_balance))
                .route("/account/register", post(register_account))
                .route("/transactions", get(list_transactions)),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
