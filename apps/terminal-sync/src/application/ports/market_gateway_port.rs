//! Market Gateway Port (Driven Port)
//!
//! Interface for the remote trading and market-data API. Adapters perform
//! exactly one remote call per method and never retry; the poll scheduler's
//! next tick is the retry.

use async_trait::async_trait;

use crate::domain::market::{Bar, Mover, MoverKind, Position, RawDepth, Symbol, Timeframe};
use crate::domain::order::{Order, OrderId, OrderRequest};
use crate::domain::scan::{ScanPreset, ScanRequest, ScanRow};

/// Gateway port error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Transport failure: connect, timeout, reset.
    #[error("network error: {0}")]
    Network(String),

    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server understood the request and refused it.
    #[error("rejected by server: {0}")]
    RejectedByServer(String),

    /// Any other non-success response.
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error details.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::NotFound(_) => "not_found",
            Self::RejectedByServer(_) => "rejected",
            Self::Api { .. } => "api",
            Self::Decode(_) => "decode",
        }
    }
}

/// Port for the remote trading API.
#[async_trait]
pub trait MarketGateway: Send + Sync {
    /// Fetch bars for a symbol and timeframe.
    async fn get_bars(&self, symbol: &Symbol, timeframe: Timeframe)
    -> Result<Vec<Bar>, GatewayError>;

    /// Fetch the raw depth snapshot for a symbol.
    async fn get_depth(&self, symbol: &Symbol) -> Result<RawDepth, GatewayError>;

    /// Fetch the full order list.
    async fn get_orders(&self) -> Result<Vec<Order>, GatewayError>;

    /// Fetch all positions.
    async fn get_positions(&self) -> Result<Vec<Position>, GatewayError>;

    /// Submit an order.
    async fn place_order(&self, request: &OrderRequest) -> Result<Order, GatewayError>;

    /// Cancel an order by server id.
    async fn cancel_order(&self, id: &OrderId) -> Result<(), GatewayError>;

    /// Fetch a market movers list.
    async fn get_movers(&self, kind: MoverKind, limit: usize) -> Result<Vec<Mover>, GatewayError>;

    /// Run a scan.
    async fn run_scan(&self, request: &ScanRequest) -> Result<Vec<ScanRow>, GatewayError>;

    /// Fetch the server's scan presets.
    async fn get_scan_presets(&self) -> Result<Vec<ScanPreset>, GatewayError>;
}
