// finsync - Web Server
// REST API with Axum over the sync orchestrator

use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use finsync::api::{router, AppState};
use finsync::{AppConfig, Database, PlaidClient, SyncOrchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🌐 finsync server v{}", finsync::VERSION);

    // Optional config path as the only argument; environment overrides on top
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;

    if !config.plaid.has_credentials() {
        bail!("Plaid credentials missing: set PLAID_CLIENT_ID and PLAID_SECRET");
    }
    if config.plaid.base_url.is_some() {
        warn!("Using Plaid base URL override: {}", config.plaid.base_url());
    }

    let tokens = config.token_cipher()?;

    let db = Database::open(&config.database_path)?;
    info!("✓ Database opened: {}", config.database_path.display());

    let client = PlaidClient::new(&config.plaid, config.sync.page_size, tokens.clone())?;
    let orchestrator = Arc::new(SyncOrchestrator::new(
        db,
        Arc::new(client),
        config.sync.clone(),
    ));

    let app = router(AppState::new(orchestrator, tokens))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("🚀 Server running on http://{}", config.bind_addr);
    info!("   Sync:    POST /accounts/:id/sync");
    info!("   Webhook: POST /webhooks/plaid");

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
