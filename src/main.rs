use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tracing_subscriber::{fmt, EnvFilter};

use formulation_studio::{
    config::Config,
    gemini::GeminiClient,
    routes::{router, AppState},
    service::FormulationService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env().context("configuration error")?;
    tracing::info!(model = %config.model, "Using API key: {}", config.masked_api_key());

    let gemini = GeminiClient::new(&config).context("failed to build HTTP client")?;
    let state = AppState::new(FormulationService::new(Arc::new(gemini)));
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
