use anyhow::Context;
use std::{net::SocketAddr, sync::Arc};
use tracing::info;

use podcast_server::{router, storage::ContentStore, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables, RUST_LOG included
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "podcast_server=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env().context("invalid configuration")?;

    info!("Initializing storage at: {}", config.storage.path);
    let store = ContentStore::open(config.storage.clone()).context("failed to open storage")?;
    info!("Storage initialized successfully");

    let port = config.port;
    let state = Arc::new(AppState::new(store, config).context("failed to set up auth")?);

    // Start background tasks
    let background = state.clone().start_background_tasks();

    let app = router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Podcast server v{} starting", env!("CARGO_PKG_VERSION"));
    info!("   Listening on: http://{}", addr);
    info!("   Change feed: ws://{}/ws/feed", addr);
    info!("   Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
            shutdown_state.shutdown();
        })
        .await
        .context("server error")?;

    background.wait().await;
    state.store.flush().context("final flush failed")?;
    info!("Server stopped");
    Ok(())
}
