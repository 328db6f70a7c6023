//! Order Lifecycle Manager
//!
//! Submits and cancels orders through the gateway and keeps the store's
//! orders view in step with the [`OrderLedger`]: optimistic entries are
//! written before the remote call returns and reconciled against each
//! order poll.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;

use crate::application::ports::{GatewayError, MarketGateway};
use crate::application::store::{Mutation, Store};
use crate::domain::ValidationError;
use crate::domain::order::{
    LedgerSettings, Order, OrderId, OrderLedger, OrderStateMachine, OrderStatus, OrderTicket,
    ReconcileSummary,
};
use crate::infrastructure::metrics;

/// Order manager errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// The ticket failed validation; nothing was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The order cannot be canceled in its current state.
    #[error("order {id} cannot be canceled: {reason}")]
    InvalidState {
        /// Order id.
        id: OrderId,
        /// Why the request was refused.
        reason: String,
    },

    /// No visible order has this id.
    #[error("order not found: {0}")]
    NotFound(OrderId),

    /// The server refused the request.
    #[error("rejected by server: {0}")]
    RejectedByServer(String),

    /// The request did not reach the server or its answer was unusable.
    #[error("network error: {0}")]
    Network(String),
}

impl From<GatewayError> for OrderError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::RejectedByServer(reason) => Self::RejectedByServer(reason),
            GatewayError::Api { status, message } if (400..500).contains(&status) => {
                Self::RejectedByServer(message)
            }
            GatewayError::NotFound(what) => Self::RejectedByServer(format!("not found: {what}")),
            other => Self::Network(other.to_string()),
        }
    }
}

/// Submits, cancels and reconciles orders.
///
/// Cheap to clone; clones share one ledger.
#[derive(Clone)]
pub struct OrderManager {
    store: Arc<Store>,
    gateway: Arc<dyn MarketGateway>,
    ledger: Arc<Mutex<OrderLedger>>,
    settings: LedgerSettings,
}

impl std::fmt::Debug for OrderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderManager")
            .field("settings", &self.settings)
            .field("ledger", &*self.ledger.lock())
            .finish_non_exhaustive()
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

impl OrderManager {
    /// Create a manager writing into `store`.
    #[must_use]
    pub fn new(store: Arc<Store>, gateway: Arc<dyn MarketGateway>, settings: LedgerSettings) -> Self {
        Self {
            store,
            gateway,
            ledger: Arc::new(Mutex::new(OrderLedger::new(settings))),
            settings,
        }
    }

    /// Submit an order.
    ///
    /// The order is visible in the store as pending before the gateway is
    /// called. A refused order stays visible as rejected for the rejected
    /// retention period.
    ///
    /// # Errors
    ///
    /// `Validation` if the ticket is invalid (the gateway is not called),
    /// `RejectedByServer` or `Network` if the submission failed.
    pub async fn place(&self, ticket: OrderTicket) -> Result<Order, OrderError> {
        // 1. Validate
        let temporary_id = OrderId::temporary();
        let request = match ticket.into_request(temporary_id.clone()) {
            Ok(request) => request,
            Err(err) => {
                metrics::record_order_submission("invalid");
                return Err(err.into());
            }
        };

        // 2. Show it optimistically
        self.update(|ledger| ledger.insert_submitting(request.to_pending_order(), now()));
        tracing::info!(
            client_order_id = %temporary_id,
            symbol = %request.symbol,
            side = %request.side,
            order_type = %request.order_type,
            quantity = %request.quantity,
            "Submitting order"
        );

        // 3. Submit
        match self.gateway.place_order(&request).await {
            Ok(order) => {
                tracing::info!(
                    client_order_id = %temporary_id,
                    order_id = %order.id,
                    status = %order.status,
                    "Order accepted"
                );
                metrics::record_order_submission("accepted");
                self.update(|ledger| ledger.mark_accepted(&temporary_id, order.clone(), now()));
                Ok(order)
            }
            Err(err) => {
                tracing::warn!(client_order_id = %temporary_id, error = %err, "Order rejected");
                metrics::record_order_submission("rejected");
                self.update(|ledger| ledger.mark_rejected(&temporary_id, err.to_string(), now()));
                self.schedule_prune();
                Err(err.into())
            }
        }
    }

    /// Cancel an order by server id.
    ///
    /// On success the order shows as canceled until a poll confirms it.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidState` if the order is
    /// terminal or not yet acknowledged by the server, `RejectedByServer`
    /// or `Network` if the remote cancel failed. The order is unchanged on
    /// every error.
    pub async fn cancel(&self, id: &OrderId) -> Result<(), OrderError> {
        // 1. Check it can be canceled
        let order = self
            .find(id)
            .ok_or_else(|| OrderError::NotFound(id.clone()))?;

        if !order.has_server_id() {
            metrics::record_cancel("invalid_state");
            return Err(OrderError::InvalidState {
                id: id.clone(),
                reason: "order has not been acknowledged by the server".to_string(),
            });
        }
        if !OrderStateMachine::is_valid_transition(order.status, OrderStatus::Canceled) {
            metrics::record_cancel("invalid_state");
            return Err(OrderError::InvalidState {
                id: id.clone(),
                reason: OrderStateMachine::transition_error_reason(
                    order.status,
                    OrderStatus::Canceled,
                ),
            });
        }

        // 2. Cancel remotely
        if let Err(err) = self.gateway.cancel_order(id).await {
            tracing::warn!(order_id = %id, error = %err, "Cancel failed");
            metrics::record_cancel("failed");
            return Err(err.into());
        }

        // 3. Show it canceled until the next poll agrees
        let marked = self.update(|ledger| ledger.mark_cancel_pending(id, now()));
        if !marked {
            tracing::debug!(order_id = %id, "Order changed state during cancel, left as polled");
        }
        metrics::record_cancel("accepted");
        tracing::info!(order_id = %id, "Cancel requested");
        Ok(())
    }

    /// Merge a polled order list and publish the result.
    pub fn reconcile(&self, polled: Vec<Order>) -> ReconcileSummary {
        let summary = self.update(|ledger| ledger.reconcile(polled, now()));
        if summary.matched > 0 || summary.expired > 0 {
            tracing::debug!(
                matched = summary.matched,
                retained = summary.retained,
                expired = summary.expired,
                "Orders reconciled"
            );
        }
        summary
    }

    /// Drop expired optimistic entries and publish if any were dropped.
    pub fn prune_expired(&self) -> usize {
        let mut ledger = self.ledger.lock();
        let dropped = ledger.prune_expired(now());
        if dropped > 0 {
            self.store.apply(Mutation::ReplaceOrders(ledger.view()));
        }
        dropped
    }

    /// The visible order with this id.
    #[must_use]
    pub fn find(&self, id: &OrderId) -> Option<Order> {
        self.ledger.lock().find(id)
    }

    /// Status of the visible order with this id.
    #[must_use]
    pub fn status_of(&self, id: &OrderId) -> Option<OrderStatus> {
        self.find(id).map(|order| order.status)
    }

    /// Run `f` on the ledger and publish the new view.
    ///
    /// The ledger lock is held across the store write so views are
    /// published in the order they were produced. Store listeners must not
    /// call back into the manager.
    fn update<R>(&self, f: impl FnOnce(&mut OrderLedger) -> R) -> R {
        let mut ledger = self.ledger.lock();
        let result = f(&mut ledger);
        self.store.apply(Mutation::ReplaceOrders(ledger.view()));
        result
    }

    fn schedule_prune(&self) {
        let manager = self.clone();
        let retention = self.settings.rejected_retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            manager.prune_expired();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::InMemoryGateway;
    use crate::domain::market::Symbol;
    use crate::domain::order::{OrderEntry, OrderSide, OrderType};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn setup() -> (OrderManager, Arc<InMemoryGateway>, Arc<Store>) {
        let store = Arc::new(Store::new());
        let gateway = Arc::new(InMemoryGateway::new());
        let manager = OrderManager::new(store.clone(), gateway.clone(), LedgerSettings::default());
        (manager, gateway, store)
    }

    fn aapl_limit() -> OrderTicket {
        OrderTicket::limit(Symbol::new("AAPL"), OrderSide::Buy, dec!(10), dec!(175))
    }

    fn visible(store: &Store) -> Vec<OrderEntry> {
        store.snapshot().orders.value.clone().unwrap_or_default()
    }

    #[tokio::test]
    async fn zero_quantity_never_reaches_gateway() {
        let (manager, gateway, store) = setup();
        let ticket = OrderTicket::market(Symbol::new("AAPL"), OrderSide::Buy, dec!(0));

        let err = manager.place(ticket).await.unwrap_err();

        assert!(matches!(
            err,
            OrderError::Validation(ValidationError::NonPositiveQuantity(_))
        ));
        assert!(gateway.placed_orders().is_empty());
        assert_eq!(store.snapshot().version, 0);
    }

    #[tokio::test]
    async fn limit_without_price_is_invalid() {
        let (manager, gateway, _store) = setup();
        let mut ticket = aapl_limit();
        ticket.limit_price = None;

        let err = manager.place(ticket).await.unwrap_err();

        assert!(matches!(
            err,
            OrderError::Validation(ValidationError::MissingLimitPrice { .. })
        ));
        assert!(gateway.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn market_order_drops_limit_price() {
        let (manager, gateway, _store) = setup();
        let mut ticket = OrderTicket::market(Symbol::new("AAPL"), OrderSide::Sell, dec!(5));
        ticket.limit_price = Some(dec!(180));

        manager.place(ticket).await.unwrap();

        let sent = gateway.placed_orders();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].order_type, OrderType::Market);
        assert_eq!(sent[0].limit_price, None);
        assert!(sent[0].client_order_id.is_temporary());
    }

    #[tokio::test]
    async fn accepted_order_carries_server_id() {
        let (manager, _gateway, store) = setup();
        let versions = Arc::new(Mutex::new(Vec::new()));
        let seen = versions.clone();
        store.subscribe(move |snap| {
            let statuses: Vec<OrderStatus> = snap
                .orders
                .value
                .iter()
                .flatten()
                .map(|e| e.order().status)
                .collect();
            seen.lock().push(statuses);
        });

        let order = manager.place(aapl_limit()).await.unwrap();

        assert_eq!(order.id, OrderId::new("srv-1"));
        assert_eq!(
            *versions.lock(),
            vec![vec![OrderStatus::Pending], vec![OrderStatus::Accepted]]
        );
        let view = visible(&store);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].order().id, OrderId::new("srv-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_order_is_pruned_after_retention() {
        let (manager, gateway, store) = setup();
        gateway.fail_next_order(GatewayError::RejectedByServer("insufficient buying power".into()));

        let err = manager.place(aapl_limit()).await.unwrap_err();
        assert_eq!(
            err,
            OrderError::RejectedByServer("insufficient buying power".into())
        );

        let view = visible(&store);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].order().status, OrderStatus::Rejected);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(visible(&store).len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(visible(&store).is_empty());
    }

    #[tokio::test]
    async fn network_failure_maps_to_network_error() {
        let (manager, gateway, _store) = setup();
        gateway.fail_next_order(GatewayError::Network("connection refused".into()));

        let err = manager.place(aapl_limit()).await.unwrap_err();

        assert!(matches!(err, OrderError::Network(_)));
    }

    #[tokio::test]
    async fn cancel_unknown_order_is_not_found() {
        let (manager, gateway, _store) = setup();

        let err = manager.cancel(&OrderId::new("srv-404")).await.unwrap_err();

        assert_eq!(err, OrderError::NotFound(OrderId::new("srv-404")));
        assert!(gateway.canceled_orders().is_empty());
    }

    #[tokio::test]
    async fn cancel_filled_order_is_invalid_state() {
        let (manager, gateway, _store) = setup();
        let mut filled = aapl_limit()
            .into_request(OrderId::temporary())
            .unwrap()
            .to_pending_order();
        filled.id = OrderId::new("srv-7");
        filled.status = OrderStatus::Filled;
        manager.reconcile(vec![filled.clone()]);

        let err = manager.cancel(&filled.id).await.unwrap_err();

        assert!(matches!(err, OrderError::InvalidState { .. }));
        assert!(gateway.canceled_orders().is_empty());
        assert_eq!(manager.status_of(&filled.id), Some(OrderStatus::Filled));
    }

    #[tokio::test]
    async fn cancel_before_acknowledgement_is_invalid_state() {
        let (manager, gateway, _store) = setup();
        let pending = aapl_limit()
            .into_request(OrderId::temporary())
            .unwrap()
            .to_pending_order();
        manager.update(|ledger| ledger.insert_submitting(pending.clone(), now()));

        let err = manager.cancel(&pending.id).await.unwrap_err();

        assert!(matches!(err, OrderError::InvalidState { .. }));
        assert!(gateway.canceled_orders().is_empty());
    }

    #[tokio::test]
    async fn successful_cancel_shows_canceled_until_poll_confirms() {
        let (manager, gateway, store) = setup();
        let order = manager.place(aapl_limit()).await.unwrap();
        let mut lagging = order.clone();
        lagging.status = OrderStatus::Accepted;

        manager.cancel(&order.id).await.unwrap();
        manager.reconcile(vec![lagging]);

        assert_eq!(gateway.canceled_orders(), vec![order.id.clone()]);
        let view = visible(&store);
        assert_eq!(view.len(), 1);
        assert!(view[0].is_optimistic());
        assert_eq!(view[0].order().status, OrderStatus::Canceled);
    }

    #[tokio::test]
    async fn refused_cancel_leaves_order_unchanged() {
        let (manager, gateway, _store) = setup();
        let order = manager.place(aapl_limit()).await.unwrap();
        gateway.fail_next_cancel(GatewayError::RejectedByServer("order already filled".into()));

        let err = manager.cancel(&order.id).await.unwrap_err();

        assert_eq!(err, OrderError::RejectedByServer("order already filled".into()));
        assert_eq!(manager.status_of(&order.id), Some(OrderStatus::Accepted));
    }

    #[test]
    fn gateway_errors_map_to_order_errors() {
        assert_eq!(
            OrderError::from(GatewayError::Api {
                status: 422,
                message: "bad qty".into()
            }),
            OrderError::RejectedByServer("bad qty".into())
        );
        assert!(matches!(
            OrderError::from(GatewayError::Api {
                status: 503,
                message: "unavailable".into()
            }),
            OrderError::Network(_)
        ));
        assert!(matches!(
            OrderError::from(GatewayError::Decode("eof".into())),
            OrderError::Network(_)
        ));
    }
}
