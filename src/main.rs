//! Story Engine server
//!
//! Serves the story REST API and runs the expiry sweeper in the background.

use anyhow::Context;
use std::{net::SocketAddr, sync::Arc};
use tracing::info;

use story_engine::api::{router, AppState};
use story_engine::clock::{Clock, SystemClock};
use story_engine::config::ServerConfig;
use story_engine::storage::{ExpirySweeper, StoryStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "story_engine=info,tower_http=info".into()),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();
    let config = ServerConfig::from_env();

    info!("Initializing storage at: {}", config.storage.path);

    let store = StoryStore::open(config.storage.clone(), config.policy.ttl)
        .context("Failed to open storage")?;
    let store = Arc::new(store);

    info!("Storage initialized successfully");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Start background sweeper
    let sweeper = Arc::new(ExpirySweeper::new(store.clone(), clock.clone(), &config.policy));
    let sweeper_handle = sweeper.clone().start();

    let state = Arc::new(AppState::new(store.clone(), clock));
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    info!("Story engine v{} starting", env!("CARGO_PKG_VERSION"));
    info!("   Story TTL: {}s", config.policy.ttl.num_seconds());
    info!("   Sweep interval: {:?}", config.policy.sweep_interval);
    info!("   Listening on: http://{}", addr);
    info!("   Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.shutdown();
    let _ = sweeper_handle.await;
    store.flush().context("Failed to flush storage")?;

    info!("Story engine stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
