//! Orders, tickets and the optimistic/confirmed entry model.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::{OrderSide, OrderStatus, OrderType, TimeInForce};
use crate::domain::errors::ValidationError;
use crate::domain::market::Symbol;

const TEMPORARY_PREFIX: &str = "tmp-";

// =============================================================================
// Identifiers
// =============================================================================

/// Order identifier.
///
/// Server-assigned once accepted. Before acceptance the terminal uses a
/// temporary `tmp-<uuid>` id that doubles as the client order id sent to
/// the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Wrap a server-assigned id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh temporary id.
    #[must_use]
    pub fn temporary() -> Self {
        Self(format!("{TEMPORARY_PREFIX}{}", Uuid::new_v4()))
    }

    /// Whether this id was generated locally.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMPORARY_PREFIX)
    }

    /// Get the id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Order
// =============================================================================

/// An order as known to the terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Server id, or a temporary id before acceptance.
    pub id: OrderId,
    /// Client order id echoed back by the server, if any.
    pub client_order_id: Option<String>,
    /// Symbol.
    pub symbol: Symbol,
    /// Side.
    pub side: OrderSide,
    /// Type.
    pub order_type: OrderType,
    /// Quantity, strictly positive.
    pub quantity: Decimal,
    /// Limit price. Absent for market orders.
    pub limit_price: Option<Decimal>,
    /// Status.
    pub status: OrderStatus,
    /// Time in force.
    pub time_in_force: TimeInForce,
}

impl Order {
    /// Whether the order carries a server-assigned id.
    #[must_use]
    pub fn has_server_id(&self) -> bool {
        !self.id.is_temporary()
    }

    /// Whether `other` refers to the same order, by server id or echoed
    /// client id.
    #[must_use]
    pub fn same_order(&self, other: &Self) -> bool {
        if self.has_server_id() && self.id == other.id {
            return true;
        }
        match (&self.client_order_id, &other.client_order_id) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

// =============================================================================
// Ticket
// =============================================================================

/// User input for a new order, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTicket {
    /// Symbol.
    pub symbol: Symbol,
    /// Side.
    pub side: OrderSide,
    /// Type.
    pub order_type: OrderType,
    /// Quantity.
    pub quantity: Decimal,
    /// Limit price as typed. Ignored for market orders.
    pub limit_price: Option<Decimal>,
    /// Time in force.
    #[serde(default)]
    pub time_in_force: TimeInForce,
}

impl OrderTicket {
    /// Market order ticket.
    #[must_use]
    pub fn market(symbol: Symbol, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol,
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            time_in_force: TimeInForce::Day,
        }
    }

    /// Limit order ticket.
    #[must_use]
    pub fn limit(symbol: Symbol, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol,
            side,
            order_type: OrderType::Limit,
            quantity,
            limit_price: Some(price),
            time_in_force: TimeInForce::Day,
        }
    }

    /// Validate the ticket and turn it into a submittable request.
    ///
    /// Market orders have their limit price stripped.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the quantity is not positive or a
    /// priced order type lacks a positive limit price.
    pub fn into_request(self, client_order_id: OrderId) -> Result<OrderRequest, ValidationError> {
        if self.quantity <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveQuantity(self.quantity.to_string()));
        }

        let limit_price = if self.order_type.requires_price() {
            let price = self.limit_price.ok_or_else(|| ValidationError::MissingLimitPrice {
                order_type: self.order_type.to_string(),
            })?;
            if price <= Decimal::ZERO {
                return Err(ValidationError::NonPositivePrice(price.to_string()));
            }
            Some(price)
        } else {
            None
        };

        Ok(OrderRequest {
            client_order_id,
            symbol: self.symbol,
            side: self.side,
            order_type: self.order_type,
            quantity: self.quantity,
            limit_price,
            time_in_force: self.time_in_force,
        })
    }
}

/// A validated order ready for the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Temporary id, sent as the client order id.
    pub client_order_id: OrderId,
    /// Symbol.
    pub symbol: Symbol,
    /// Side.
    pub side: OrderSide,
    /// Type.
    pub order_type: OrderType,
    /// Quantity.
    pub quantity: Decimal,
    /// Limit price, present iff the type is priced.
    pub limit_price: Option<Decimal>,
    /// Time in force.
    pub time_in_force: TimeInForce,
}

impl OrderRequest {
    /// The local order this request represents while in flight.
    #[must_use]
    pub fn to_pending_order(&self) -> Order {
        Order {
            id: self.client_order_id.clone(),
            client_order_id: Some(self.client_order_id.to_string()),
            symbol: self.symbol.clone(),
            side: self.side,
            order_type: self.order_type,
            quantity: self.quantity,
            limit_price: self.limit_price,
            status: OrderStatus::Pending,
            time_in_force: self.time_in_force,
        }
    }
}

// =============================================================================
// Entries
// =============================================================================

/// Where a locally written order is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimisticPhase {
    /// Sent, awaiting the server's answer.
    Submitting,
    /// Server accepted it; waiting to see it in an order poll.
    Accepted,
    /// Server refused it. Shown until the retention period elapses.
    Rejected {
        /// Reason given by the server or transport.
        reason: String,
    },
    /// Cancel succeeded remotely; waiting for a poll to confirm it.
    CancelPending,
}

/// An order written by the terminal ahead of the authoritative list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticOrder {
    /// The order as the terminal believes it to be.
    pub order: Order,
    /// Lifecycle phase.
    pub phase: OptimisticPhase,
    /// Consecutive order polls that did not contain this order.
    pub missed_polls: u32,
}

impl OptimisticOrder {
    /// A freshly submitted order.
    #[must_use]
    pub const fn submitting(order: Order) -> Self {
        Self {
            order,
            phase: OptimisticPhase::Submitting,
            missed_polls: 0,
        }
    }
}

/// One row of the orders view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEntry {
    /// Written locally, not yet confirmed by a poll.
    Optimistic(OptimisticOrder),
    /// From the authoritative polled list.
    Confirmed(Order),
}

impl OrderEntry {
    /// The order carried by this entry.
    #[must_use]
    pub const fn order(&self) -> &Order {
        match self {
            Self::Optimistic(o) => &o.order,
            Self::Confirmed(o) => o,
        }
    }

    /// Whether this entry is optimistic.
    #[must_use]
    pub const fn is_optimistic(&self) -> bool {
        matches!(self, Self::Optimistic(_))
    }
}
