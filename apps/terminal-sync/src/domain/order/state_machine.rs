//! Order status transitions.

use super::value_objects::OrderStatus;

/// Encodes which status changes an order may make.
///
/// ```text
/// pending -> accepted -> partially_filled -> filled
///    |          |              |
///    |          +--------------+--> canceled
///    +--> rejected
/// ```
///
/// Terminal statuses (filled, canceled, rejected) have no successors.
pub struct OrderStateMachine;

impl OrderStateMachine {
    /// Check whether a transition is allowed.
    #[must_use]
    pub const fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
        matches!(
            (from, to),
            // From Pending
            (OrderStatus::Pending, OrderStatus::Accepted)
                | (OrderStatus::Pending, OrderStatus::Rejected)
                | (OrderStatus::Pending, OrderStatus::PartiallyFilled)
                | (OrderStatus::Pending, OrderStatus::Filled)
                // From Accepted
                | (OrderStatus::Accepted, OrderStatus::PartiallyFilled)
                | (OrderStatus::Accepted, OrderStatus::Filled)
                | (OrderStatus::Accepted, OrderStatus::Canceled)
                // From PartiallyFilled
                | (OrderStatus::PartiallyFilled, OrderStatus::PartiallyFilled)
                | (OrderStatus::PartiallyFilled, OrderStatus::Filled)
                | (OrderStatus::PartiallyFilled, OrderStatus::Canceled)
        )
    }

    /// Status to show when a local view and a polled view disagree.
    ///
    /// A locally known terminal status is never replaced by a non-terminal
    /// one; anything else defers to the polled status.
    #[must_use]
    pub const fn merge(local: OrderStatus, polled: OrderStatus) -> OrderStatus {
        if local.is_terminal() && !polled.is_terminal() {
            local
        } else {
            polled
        }
    }

    /// Human-readable reason for an invalid transition.
    #[must_use]
    pub fn transition_error_reason(from: OrderStatus, to: OrderStatus) -> String {
        match from {
            OrderStatus::Filled => format!("order is already filled, cannot move to {to}"),
            OrderStatus::Canceled => format!("order is canceled, cannot move to {to}"),
            OrderStatus::Rejected => format!("order was rejected, cannot move to {to}"),
            _ => format!("invalid transition from {from} to {to}"),
        }
    }
}
