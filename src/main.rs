// keywheel - API key failover proxy for Gemini
//
// A single-endpoint HTTP proxy in front of the Gemini generateContent API.
// Each inbound request is relayed through an ordered pool of API keys; the
// first key that yields a successful upstream response wins.
//
// Architecture:
// - Proxy server (axum): accepts the request, validates the body, sets CORS
// - Dispatcher: the sequential failover loop over the configured keys
// - Config: env > config file > defaults, loaded once at startup

mod cli;
mod config;
mod proxy;
mod startup;

use anyhow::Result;
use config::{Config, LogRotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Handle CLI commands first (config --show, --reset, --edit, --path)
    // If a command was handled, exit early
    if cli::handle_cli() {
        return Ok(());
    }

    // Ensure config template exists (helps users discover options)
    Config::ensure_config_exists();

    let config = Config::from_env();

    // Initialize tracing/logging
    // Precedence: RUST_LOG env var > config file > default "info"
    let default_filter = format!("keywheel={},tower_http=debug,axum=debug", config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    // File logging is optional (non-blocking writer with rotation).
    // The guard must stay alive for the duration of the program so logs flush.
    let _file_guard: Option<tracing_appender::non_blocking::WorkerGuard> =
        if config.logging.file_enabled {
            if let Err(e) = std::fs::create_dir_all(&config.logging.file_dir) {
                eprintln!(
                    "Warning: Could not create log directory {:?}: {}",
                    config.logging.file_dir, e
                );
                tracing_subscriber::registry()
                    .with(filter)
                    .with(tracing_subscriber::fmt::layer())
                    .init();
                None
            } else {
                let file_appender = match config.logging.file_rotation {
                    LogRotation::Hourly => tracing_appender::rolling::hourly(
                        &config.logging.file_dir,
                        &config.logging.file_prefix,
                    ),
                    LogRotation::Daily => tracing_appender::rolling::daily(
                        &config.logging.file_dir,
                        &config.logging.file_prefix,
                    ),
                    LogRotation::Never => tracing_appender::rolling::never(
                        &config.logging.file_dir,
                        &config.logging.file_prefix,
                    ),
                };

                // Writes happen in a background thread; file layer uses JSON
                // format for structured log parsing
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                tracing_subscriber::registry()
                    .with(filter)
                    .with(tracing_subscriber::fmt::layer())
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(non_blocking)
                            .with_ansi(false),
                    )
                    .init();

                Some(guard)
            }
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            None
        };

    startup::print_startup(&config);
    startup::log_startup(&config);

    if config.api_keys.is_empty() {
        // Not fatal at startup: each request answers with the configuration
        // error, matching the per-request contract
        tracing::warn!(
            "No API keys configured - every request will fail with a configuration error"
        );
    }

    // Graceful shutdown on ctrl-c via a oneshot channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(());
        }
    });

    proxy::start_proxy(config, shutdown_rx).await
}
