// bilan-server - Ingest server for the bilan telemetry pipeline
//
// Receives event batches from SDK clients over an authenticated HTTP
// endpoint, validates and deduplicates them, and persists the unified
// event stream into SQLite for the correlation query layer.

use anyhow::{Context, Result};
use bilan::cli;
use bilan::config::ServerConfig;
use bilan::server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Handle CLI commands first (config --show, --reset, --path)
    // If a command was handled, exit early
    if cli::handle_cli() {
        return Ok(());
    }

    // Ensure config template exists (helps users discover options)
    ServerConfig::ensure_config_exists();

    let config = ServerConfig::from_env();
    config.validate()?;

    // Initialize tracing: stdout plus a daily-rotated file in log_dir.
    // Precedence: RUST_LOG env var > config file level > default "info"
    std::fs::create_dir_all(&config.log_dir).context("Failed to create log directory")?;
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "bilan-server.log");
    let (file_writer, _file_guard) = tracing_appender::non_blocking(file_appender);

    let default_filter = format!("bilan={},tower_http=debug,axum=debug", config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    tracing::info!("bilan-server v{} starting", bilan::config::VERSION);
    tracing::info!(
        "Environment: {:?}, store: {}",
        config.environment,
        config.db_path.display()
    );

    // Graceful shutdown on ctrl-c via a oneshot signal
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(());
        }
    });

    server::start_server(config, shutdown_rx).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
