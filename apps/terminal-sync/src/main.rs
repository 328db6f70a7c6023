//! Terminal Sync Binary
//!
//! Runs the sync core against the trading API and logs snapshot changes.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin terminal-sync
//! ```
//!
//! # Environment Variables
//!
//! - `TERMINAL_API_URL`: API base URL (default: <http://localhost:8000>)
//! - `TERMINAL_API_TOKEN`: Bearer token (optional)
//! - `TERMINAL_HTTP_TIMEOUT_MS`: Request timeout (default: 10000)
//! - `TERMINAL_SYMBOL`, `TERMINAL_WATCHLIST`, `TERMINAL_TIMEFRAME`: initial selection
//! - `TERMINAL_POLL_*_MS`: per-feed poll intervals
//! - `TERMINAL_METRICS_PORT`: Prometheus metrics port (default: 0, disabled)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use terminal_sync::infrastructure::telemetry;
use terminal_sync::{HttpGateway, Snapshot, SyncConfig, TerminalSync, init_metrics};
use tokio::signal;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting terminal sync");

    let config = SyncConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    if let Some(addr) = init_metrics(config.metrics_port)? {
        tracing::info!(%addr, "Prometheus metrics listening");
    }

    let gateway = Arc::new(HttpGateway::new(&config.api)?);
    let terminal = TerminalSync::new(gateway, config.terminal);
    let mut changes = terminal.store().watch();
    terminal.start();

    let shutdown = await_shutdown();
    tokio::pin!(shutdown);

    let mut degraded = false;
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = Arc::clone(&changes.borrow_and_update());
                degraded = log_snapshot(&snapshot, degraded);
            }
        }
    }

    terminal.shutdown();
    tracing::info!("Terminal sync stopped");
    Ok(())
}

/// Log a published snapshot. Returns whether any feed is degraded.
fn log_snapshot(snapshot: &Snapshot, was_degraded: bool) -> bool {
    let degraded = snapshot.has_degraded_feeds();
    let orders = snapshot.orders.value.as_ref().map_or(0, Vec::len);
    let positions = snapshot.positions.value.as_ref().map_or(0, Vec::len);

    tracing::debug!(
        version = snapshot.version,
        symbol = %snapshot.selected_symbol,
        timeframe = %snapshot.timeframe,
        orders,
        positions,
        "Snapshot published"
    );

    match (was_degraded, degraded) {
        (false, true) => tracing::warn!(version = snapshot.version, "Feeds degraded"),
        (true, false) => tracing::info!(version = snapshot.version, "Feeds recovered"),
        _ => {}
    }
    degraded
}

/// Log the parsed configuration.
fn log_config(config: &SyncConfig) {
    tracing::info!(
        api_url = %config.api.base_url,
        authenticated = config.api.token.is_some(),
        symbol = %config.terminal.symbol,
        timeframe = %config.terminal.timeframe,
        watchlist = config.terminal.watchlist.len(),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(intervals = ?config.terminal.intervals, "Poll intervals");
}

/// Load .env from the current directory or the nearest ancestor that has one.
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
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
