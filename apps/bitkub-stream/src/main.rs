//! Bitkub Stream Binary
//!
//! Opens the configured Bitkub streams and logs every frame.
//!
//! # Usage
//!
//! ```bash
//! BITKUB_TICKERS=BTC/THB,ETH/THB BITKUB_SANITIZE=true cargo run --bin bitkub-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Streams
//! - `BITKUB_TICKERS`: Comma-separated ticker symbols
//! - `BITKUB_TRADES`: Comma-separated trade symbols
//! - `BITKUB_ORDER_BOOKS`: Comma-separated order-book symbol ids
//!
//! ## Optional
//! - `BITKUB_WS_URL`: Stream base URL (default: wss://api.bitkub.com/websocket-api/)
//! - `BITKUB_RECONNECT`, `BITKUB_VERBOSE`, `BITKUB_SANITIZE`,
//!   `BITKUB_IGNORE_TICKERS`, `BITKUB_IGNORE_GLOBAL_TICKERS`: option flags
//! - `BITKUB_HEARTBEAT_INTERVAL_SECS`: Heartbeat interval (default: 30)
//! - `BITKUB_RECONNECT_DELAY_INITIAL_MS`, `BITKUB_RECONNECT_DELAY_MAX_SECS`,
//!   `BITKUB_RECONNECT_DELAY_MULTIPLIER`, `BITKUB_MAX_RECONNECT_ATTEMPTS`: backoff
//! - `BITKUB_METRICS_PORT`: Prometheus metrics port (default: 0, disabled)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log filter (default: bitkub_stream=info)

use std::sync::Arc;

use anyhow::Context;
use bitkub_stream::infrastructure::telemetry;
use bitkub_stream::{
    ClientConfig, MessageCallback, StreamFrame, StreamManager, WsConnector, init_metrics,
};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting Bitkub Stream");

    let config = ClientConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    if let Some(addr) = init_metrics(config.metrics_port).context("failed to start metrics")? {
        tracing::info!(%addr, "Prometheus metrics listening");
    }

    let manager = StreamManager::new(config.manager_config(), Arc::new(WsConnector::new()));
    subscribe_configured(&manager, &config)?;

    await_shutdown().await;
    manager.shutdown();

    Ok(())
}

/// Open the streams named in the configuration.
fn subscribe_configured(manager: &StreamManager, config: &ClientConfig) -> anyhow::Result<()> {
    let streams = &config.subscriptions;
    if streams.is_empty() {
        tracing::warn!("No streams configured, set BITKUB_TICKERS/BITKUB_TRADES/BITKUB_ORDER_BOOKS");
        return Ok(());
    }

    if !streams.tickers.is_empty() {
        let endpoint = manager.tickers(selection(&streams.tickers), log_frames("ticker"))?;
        tracing::info!(%endpoint, "Ticker stream requested");
    }
    if !streams.trades.is_empty() {
        let endpoint = manager.trades(selection(&streams.trades), log_frames("trade"))?;
        tracing::info!(%endpoint, "Trade stream requested");
    }
    for &symbol_id in &streams.order_books {
        let endpoint = manager.order_book(symbol_id, log_frames("orderbook"))?;
        tracing::info!(%endpoint, "Order book stream requested");
    }

    Ok(())
}

fn selection(symbols: &[String]) -> bitkub_stream::SymbolSelection {
    match symbols {
        [symbol] => symbol.clone().into(),
        _ => symbols.to_vec().into(),
    }
}

fn log_frames(kind: &'static str) -> MessageCallback {
    Arc::new(move |frame: StreamFrame| {
        let body = serde_json::to_string(frame.fields()).unwrap_or_default();
        tracing::info!(
            kind,
            channel = frame.channel().unwrap_or_default(),
            symbol = frame.symbol().unwrap_or_default(),
            event = frame.event_tag().unwrap_or_default(),
            frame = %body,
            "Frame"
        );
    })
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        stream_url = %config.stream_url,
        reconnect = config.options.reconnect,
        sanitize = config.options.sanitize,
        ignore_tickers = config.options.ignore_tickers,
        ignore_global_tickers = config.options.ignore_global_tickers,
        heartbeat_interval_secs = config.websocket.heartbeat_interval.as_secs(),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
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

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
