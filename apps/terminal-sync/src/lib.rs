#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Terminal Sync - Real-time state core for a trading terminal
//!
//! Keeps a local picture of a remote trading API current by polling its
//! feeds on fixed intervals, normalizes what comes back, and publishes
//! consistent snapshots to observers. Orders are shown optimistically and
//! reconciled against the server's order list.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Pure types and rules
//!   - `market`: symbols, bars, depth, positions, movers
//!   - `depth`: price ladder construction
//!   - `order`: order model, status transitions, optimistic ledger
//!   - `scan`: filter validation and result ordering
//!   - `subscription`: poll keys and the shared-task registry
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: the `MarketGateway` port and an in-memory gateway
//!   - `store`: the snapshot store
//!   - `services`: poll scheduler, feed router, orders, scans, facade
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `http`: REST gateway
//!   - `config`: environment configuration
//!   - `metrics`, `telemetry`: Prometheus and OpenTelemetry setup
//!
//! # Data Flow
//!
//! ```text
//!              tick        fetch          normalize
//! Scheduler ---------> Gateway ------> FeedRouter -----> Store ---> observers
//!     ^                                                   ^
//!     | subscribe / rekey                                 | optimistic view
//! TerminalSync ------------------------------------> OrderManager
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::errors::ValidationError;
pub use domain::market::{Symbol, Timeframe};
pub use domain::order::{OrderSide, OrderTicket, OrderType};

// Application
pub use application::ports::{GatewayError, InMemoryGateway, MarketGateway};
pub use application::services::{
    OrderError, PollIntervals, PollScheduler, ScanError, TerminalOptions, TerminalSync,
};
pub use application::store::{FeedState, Snapshot, Store};

// Infrastructure
pub use infrastructure::config::{ConfigError, SyncConfig};
pub use infrastructure::http::HttpGateway;
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
