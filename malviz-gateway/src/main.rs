//! malviz-gateway - file analysis gateway
//!
//! Accepts uploads on `POST /analyze/`, stages them to local storage, runs
//! the external AI engine on each staged file and relays its JSON verdict.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use malviz_common::config::{ensure_directory_exists, load_or_default};
use malviz_gateway::config::{Args, GatewayConfig};
use malviz_gateway::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Resolved before tracing so the configured level applies from the first line
    let (toml, source) = load_or_default(args.config.as_deref(), "gateway")
        .context("Failed to load configuration")?;
    let config = GatewayConfig::resolve(&args, &toml).context("Invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .init();

    info!(
        "Starting malviz-gateway v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!("Configuration: {}", source);

    ensure_directory_exists(&config.storage_root).with_context(|| {
        format!(
            "Failed to initialize storage root {}",
            config.storage_root.display()
        )
    })?;

    let state = AppState::from_config(&config);
    let staging = state.pipeline.staging();
    info!("Storage root: {}", staging.root().display());
    info!("Staged file retention: {}", staging.retention());
    let engine = state.pipeline.engine();
    match config.engine.timeout {
        Some(limit) => info!("AI engine: {} (timeout {}s)", engine.name(), limit.as_secs()),
        None => info!("AI engine: {} (no timeout)", engine.name()),
    }
    if !engine.is_available().await {
        warn!("AI engine is not launchable yet; analysis requests will fail until it is");
    }

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;
    info!("Listening on http://{}", config.bind);
    info!("Health check: http://{}/health", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
