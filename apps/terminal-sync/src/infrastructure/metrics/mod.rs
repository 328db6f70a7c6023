//! Prometheus Metrics Module
//!
//! Exposes sync-core metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Polling**: polls issued, ticks skipped, stale results, fetch errors
//! - **Orders**: submissions and cancels by outcome
//! - **Store**: applied mutations by kind
//! - **Tasks**: active poll task count
//!
//! Recording is a no-op until a recorder is installed, so library code and
//! tests can call these functions unconditionally.

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::subscription::DataSource;

static INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Metrics setup error.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The exporter could not be built or installed.
    #[error("failed to install Prometheus exporter: {0}")]
    Install(#[from] BuildError),
}

/// Install the Prometheus recorder with an HTTP listener on `port`.
///
/// A port of 0 disables metrics. Returns the listen address, or `None`
/// when disabled. Calling it again returns the first address.
///
/// # Errors
///
/// Returns `MetricsError` if the exporter cannot be installed.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime with a non-zero port.
pub fn init_metrics(port: u16) -> Result<Option<SocketAddr>, MetricsError> {
    if port == 0 {
        return Ok(None);
    }
    if let Some(addr) = INSTALLED.get() {
        return Ok(Some(*addr));
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();

    Ok(Some(*INSTALLED.get_or_init(|| addr)))
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Polling
    describe_counter!(
        "terminal_sync_polls_total",
        "Total fetches issued by poll tasks"
    );
    describe_counter!(
        "terminal_sync_ticks_skipped_total",
        "Ticks skipped because a fetch was still in flight"
    );
    describe_counter!(
        "terminal_sync_stale_results_total",
        "Fetch results discarded because their task was canceled"
    );
    describe_counter!(
        "terminal_sync_fetch_errors_total",
        "Failed fetches by source and error kind"
    );
    describe_gauge!(
        "terminal_sync_poll_tasks",
        "Number of live poll tasks"
    );

    // Orders
    describe_counter!(
        "terminal_sync_order_submissions_total",
        "Order submissions by outcome"
    );
    describe_counter!(
        "terminal_sync_order_cancels_total",
        "Order cancels by outcome"
    );

    // Store
    describe_counter!(
        "terminal_sync_store_mutations_total",
        "Applied store mutations by kind"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a fetch issued by a poll task.
pub fn record_poll_issued(source: DataSource) {
    counter!("terminal_sync_polls_total", "source" => source.as_str()).increment(1);
}

/// Record a tick skipped because a fetch was still in flight.
pub fn record_tick_skipped(source: DataSource) {
    counter!("terminal_sync_ticks_skipped_total", "source" => source.as_str()).increment(1);
}

/// Record a result discarded because its task had been canceled.
pub fn record_stale_result(source: DataSource) {
    counter!("terminal_sync_stale_results_total", "source" => source.as_str()).increment(1);
}

/// Record a failed fetch.
pub fn record_fetch_error(source: DataSource, kind: &'static str) {
    counter!(
        "terminal_sync_fetch_errors_total",
        "source" => source.as_str(),
        "kind" => kind
    )
    .increment(1);
}

/// Update the live poll task count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_poll_tasks(count: usize) {
    gauge!("terminal_sync_poll_tasks").set(count as f64);
}

/// Record an order submission outcome.
pub fn record_order_submission(outcome: &'static str) {
    counter!("terminal_sync_order_submissions_total", "outcome" => outcome).increment(1);
}

/// Record an order cancel outcome.
pub fn record_cancel(outcome: &'static str) {
    counter!("terminal_sync_order_cancels_total", "outcome" => outcome).increment(1);
}

/// Record an applied store mutation.
pub fn record_store_mutation(kind: &'static str) {
    counter!("terminal_sync_store_mutations_total", "kind" => kind).increment(1);
}

// =============================================================================
// Tests
// =============================================================================
