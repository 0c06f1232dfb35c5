//! PAUMIoT Server Binary
//!
//! Adaptive protocol selection middleware for IoT

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use paumiot_adaptive::RestoreOutcome;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paumiot_server::{build_state, router, ServerConfig, SERVER_VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting PAUMIoT Server v{}", SERVER_VERSION);

    let config = ServerConfig::load()?;
    info!("Loaded configuration: {:?}", config);

    let state = build_state(&config)?;
    let engine = Arc::clone(&state.engine);

    match engine.restore() {
        RestoreOutcome::Cold => info!("Cold start: all protocols unexplored, no policy tree"),
        RestoreOutcome::Restored {
            total_pulls,
            tree_version,
        } => info!(total_pulls, tree_version, "Resumed learned policy"),
    }

    let checkpoint_every = config
        .checkpoint_path
        .as_ref()
        .map(|_| Duration::from_secs(config.checkpoint_interval_secs.max(1)));
    let background = engine.spawn_background(checkpoint_every);
    info!(tasks = background.len(), "Background tasks started");

    let addr: SocketAddr = config.bind_addr().parse()?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("REST API listening on {}", addr);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Received shutdown signal");
    };

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    background.shutdown();
    if config.checkpoint_path.is_some() {
        let engine = Arc::clone(&engine);
        match tokio::task::spawn_blocking(move || engine.checkpoint()).await? {
            Ok(()) => info!("Final checkpoint written"),
            Err(e) => error!(error = %e, "Final checkpoint failed"),
        }
    }

    info!("Shutting down PAUMIoT server");
    Ok(())
}
