//! Trading API request and response types.
//!
//! These types map directly to the backend's REST JSON and convert into
//! domain types at the adapter boundary.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::ports::GatewayError;
use crate::domain::market::{Bar, Mover, Position, PriceLevel, RawDepth, Symbol};
use crate::domain::order::{
    Order, OrderId, OrderRequest, OrderSide, OrderStatus, OrderType, TimeInForce,
};

// ============================================================================
// Market Data
// ============================================================================

/// One OHLCV bar. The symbol is optional on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiBar {
    #[serde(default)]
    pub symbol: Option<Symbol>,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub volume: u64,
}

impl ApiBar {
    /// Convert to a domain bar, filling in the requested symbol.
    pub fn into_bar(self, requested: &Symbol) -> Bar {
        Bar {
            symbol: self.symbol.unwrap_or_else(|| requested.clone()),
            timestamp: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// One side of the book at one price.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiLevel {
    pub price: Decimal,
    #[serde(default)]
    pub size: u64,
}

/// Depth-of-book response. Missing sides decode as empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiDepth {
    #[serde(default)]
    pub bids: Vec<ApiLevel>,
    #[serde(default)]
    pub asks: Vec<ApiLevel>,
}

impl From<ApiDepth> for RawDepth {
    fn from(depth: ApiDepth) -> Self {
        let convert = |levels: Vec<ApiLevel>| {
            levels
                .into_iter()
                .map(|l| PriceLevel::new(l.price, l.size))
                .collect()
        };
        Self {
            bids: convert(depth.bids),
            asks: convert(depth.asks),
        }
    }
}

/// A held position.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiPosition {
    pub symbol: Symbol,
    #[serde(alias = "quantity")]
    pub qty: Decimal,
    #[serde(alias = "average_cost")]
    pub avg_entry_price: Decimal,
}

impl From<ApiPosition> for Position {
    fn from(p: ApiPosition) -> Self {
        Self {
            symbol: p.symbol,
            quantity: p.qty,
            average_cost: p.avg_entry_price,
        }
    }
}

/// One row of a movers list.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiMover {
    pub symbol: Symbol,
    pub price: Decimal,
    #[serde(alias = "change_pct")]
    pub change_percent: Decimal,
    #[serde(default)]
    pub volume: u64,
}

impl From<ApiMover> for Mover {
    fn from(m: ApiMover) -> Self {
        Self {
            symbol: m.symbol,
            price: m.price,
            change_percent: m.change_percent,
            volume: m.volume,
        }
    }
}

// ============================================================================
// Orders
// ============================================================================

/// Order submission body.
#[derive(Debug, Clone, Serialize)]
pub struct ApiOrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub qty: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
}

impl From<&OrderRequest> for ApiOrderRequest {
    fn from(request: &OrderRequest) -> Self {
        Self {
            client_order_id: request.client_order_id.as_str().to_string(),
            symbol: request.symbol.as_str().to_string(),
            side: request.side,
            order_type: request.order_type,
            qty: request.quantity,
            limit_price: request.limit_price,
            time_in_force: request.time_in_force,
        }
    }
}

/// Order as returned by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiOrder {
    pub id: String,
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub symbol: Symbol,
    pub side: OrderSide,
    #[serde(rename = "type", alias = "order_type")]
    pub order_type: OrderType,
    #[serde(alias = "quantity")]
    pub qty: Decimal,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    pub status: String,
    #[serde(default)]
    pub time_in_force: TimeInForce,
}

impl TryFrom<ApiOrder> for Order {
    type Error = GatewayError;

    fn try_from(o: ApiOrder) -> Result<Self, Self::Error> {
        let status = OrderStatus::from_api(&o.status).ok_or_else(|| {
            GatewayError::Decode(format!("unknown order status '{}' for {}", o.status, o.id))
        })?;

        Ok(Self {
            id: OrderId::new(o.id),
            client_order_id: o.client_order_id,
            symbol: o.symbol,
            side: o.side,
            order_type: o.order_type,
            quantity: o.qty,
            limit_price: o.limit_price,
            status,
            time_in_force: o.time_in_force,
        })
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error body. Both `detail` and `message` spellings are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(alias = "detail")]
    pub message: String,
}
