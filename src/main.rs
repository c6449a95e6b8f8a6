use anyhow::Context;
use chroma_gateway::{
    api::{self, AppState},
    config, logging,
    processing::{DocumentReader, Fetcher, StoreManager},
};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::load().context("Failed to load configuration")?;
    logging::init_tracing();
    if config.api_token.is_none() {
        tracing::warn!("CHROMA_API_TOKEN is not set; every /api request will be rejected");
    }

    let store = Arc::new(StoreManager::new(&config).context("Failed to initialize store")?);
    let reader = Arc::new(DocumentReader::new(
        Fetcher::new(&config).context("Failed to initialize fetcher")?,
    ));
    let app = api::create_router(AppState::new(store, reader, &config));

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.server_port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.server_port))?;
    tracing::info!("Listening on http://0.0.0.0:{}", config.server_port);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
