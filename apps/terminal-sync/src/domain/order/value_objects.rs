//! Order value objects: side, type, status and time in force.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Execute at the prevailing price.
    Market,
    /// Execute at the limit price or better.
    Limit,
    /// Becomes a market order once the price is touched.
    Stop,
    /// Becomes a limit order once the price is touched.
    StopLimit,
}

impl OrderType {
    /// Whether this type carries a price.
    #[must_use]
    pub const fn requires_price(&self) -> bool {
        !matches!(self, Self::Market)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Market => write!(f, "market"),
            Self::Limit => write!(f, "limit"),
            Self::Stop => write!(f, "stop"),
            Self::StopLimit => write!(f, "stop_limit"),
        }
    }
}

/// Order status as seen by the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Submitted locally, not yet acknowledged.
    Pending,
    /// Acknowledged by the server.
    Accepted,
    /// Some quantity filled.
    PartiallyFilled,
    /// Completely filled.
    Filled,
    /// Canceled.
    Canceled,
    /// Refused by the server.
    Rejected,
}

impl OrderStatus {
    /// Returns true if the order can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected)
    }

    /// Returns true if a cancel request makes sense for this status.
    #[must_use]
    pub const fn is_cancelable(&self) -> bool {
        matches!(self, Self::Accepted | Self::PartiallyFilled)
    }

    /// Map an API status string onto the terminal's status set.
    ///
    /// Broker-specific intermediate states collapse onto the nearest
    /// terminal-visible status. Unknown strings return `None`.
    #[must_use]
    pub fn from_api(value: &str) -> Option<Self> {
        let status = match value.trim().to_lowercase().as_str() {
            "pending" | "new" | "pending_new" => Self::Pending,
            "accepted" | "held" | "calculated" | "pending_replace" | "pending_cancel" => {
                Self::Accepted
            }
            "partially_filled" | "partial_fill" => Self::PartiallyFilled,
            "filled" => Self::Filled,
            "canceled" | "cancelled" | "expired" | "done_for_day" | "replaced" => Self::Canceled,
            "rejected" | "suspended" => Self::Rejected,
            _ => return None,
        };
        Some(status)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::PartiallyFilled => write!(f, "partially_filled"),
            Self::Filled => write!(f, "filled"),
            Self::Canceled => write!(f, "canceled"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    /// Valid for the trading day.
    #[default]
    Day,
    /// Good until canceled.
    Gtc,
    /// Immediate or cancel.
    Ioc,
    /// Fill or kill.
    Fok,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Day => write!(f, "day"),
            Self::Gtc => write!(f, "gtc"),
            Self::Ioc => write!(f, "ioc"),
            Self::Fok => write!(f, "fok"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Accepted.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn only_live_orders_are_cancelable() {
        assert!(OrderStatus::Accepted.is_cancelable());
        assert!(OrderStatus::PartiallyFilled.is_cancelable());
        assert!(!OrderStatus::Pending.is_cancelable());
        assert!(!OrderStatus::Filled.is_cancelable());
    }

    #[test]
    fn from_api_collapses_broker_states() {
        assert_eq!(OrderStatus::from_api("new"), Some(OrderStatus::Pending));
        assert_eq!(OrderStatus::from_api("FILLED"), Some(OrderStatus::Filled));
        assert_eq!(OrderStatus::from_api("expired"), Some(OrderStatus::Canceled));
        assert_eq!(OrderStatus::from_api("bogus"), None);
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&OrderStatus::PartiallyFilled).unwrap();
        assert_eq!(json, "\"partially_filled\"");
        let parsed: OrderType = serde_json::from_str("\"stop_limit\"").unwrap();
        assert_eq!(parsed, OrderType::StopLimit);
    }

    #[test]
    fn only_market_orders_skip_price() {
        assert!(!OrderType::Market.requires_price());
        assert!(OrderType::Limit.requires_price());
        assert!(OrderType::Stop.requires_price());
        assert!(OrderType::StopLimit.requires_price());
    }
}
