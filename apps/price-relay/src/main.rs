//! Price Relay Binary
//!
//! Starts the monitoring connectors and the HTTP/WebSocket server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `RELAY_API_KEYS`: comma-separated accepted API keys
//!
//! ## Optional
//! - `RELAY_HTTP_PORT`: HTTP/WebSocket port (default: 8080)
//! - `RELAY_UPSTREAM_URL`: upstream WebSocket endpoint
//! - `RELAY_RECONNECT_STRATEGY`: fixed | exponential (default: fixed)
//! - `RELAY_STREAMING_MODE`: dedicated | pooled (default: dedicated)
//! - `RELAY_INSTRUMENTS`: comma-separated pairs to monitor (default: all)
//! - `RELAY_LOG_FORMAT`: text | json (default: text)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (span export off when unset)
//! - `RUST_LOG`: Log level (default: `price_relay=info`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use price_relay::domain::store::TickStore;
use price_relay::infrastructure::access::StaticKeyGate;
use price_relay::infrastructure::config::{LogFormat, RelayConfig};
use price_relay::infrastructure::http::{AppState, HttpServer};
use price_relay::infrastructure::metrics::init_metrics;
use price_relay::infrastructure::supervisor::Supervisor;
use price_relay::infrastructure::telemetry;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let log_format = std::env::var("RELAY_LOG_FORMAT")
        .map(|s| LogFormat::from_str_case_insensitive(&s))
        .unwrap_or_default();
    let _telemetry_guard = telemetry::init(log_format);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting price relay");

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = RelayConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let registry = Arc::new(config.registry());
    let store = Arc::new(TickStore::new(config.retention()));
    let supervisor = Arc::new(Supervisor::new(
        registry,
        store,
        config.supervisor_config(),
        shutdown_token.child_token(),
    ));
    supervisor.start_monitoring();

    let gate = Arc::new(StaticKeyGate::new(
        config.access.api_keys.clone(),
        config.access.daily_call_limit,
    ));
    let state = Arc::new(AppState::new(
        env!("CARGO_PKG_VERSION"),
        Arc::clone(&supervisor),
        gate,
        shutdown_token.clone(),
    ));
    let server = HttpServer::new(config.http_port, state, shutdown_token.clone());
    let server_task = tokio::spawn(server.run());

    tracing::info!("Price relay ready");

    await_shutdown(shutdown_token).await;

    let drain = async {
        supervisor.shutdown().await;
        match server_task.await {
            Ok(Err(e)) => tracing::error!(error = %e, "HTTP server error"),
            Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
            Ok(Ok(())) => {}
        }
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Graceful shutdown timed out"
        );
    }

    tracing::info!("Price relay stopped");
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        http_port = config.http_port,
        api_keys = config.access.api_keys.len(),
        daily_call_limit = ?config.access.daily_call_limit,
        mode = %config.streaming.mode,
        instruments = config.instruments.as_ref().map_or(0, Vec::len),
        "Configuration loaded"
    );
    tracing::debug!(
        upstream_url = %config.upstream.url,
        strategy = ?config.upstream.strategy,
        reconnect_delay_ms = config.upstream.reconnect_delay.as_millis(),
        fanout_capacity = config.streaming.fanout_capacity,
        history_max_ticks = config.streaming.history_max_ticks,
        "Upstream settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler installation failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
