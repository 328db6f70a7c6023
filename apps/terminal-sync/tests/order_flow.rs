//! Order Flow Integration Tests
//!
//! Placement, cancellation and reconciliation of optimistic orders against
//! the in-memory gateway.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use terminal_sync::application::ports::{GatewayError, InMemoryGateway};
use terminal_sync::application::services::{OrderError, TerminalOptions, TerminalSync};
use terminal_sync::domain::market::Symbol;
use terminal_sync::domain::order::{
    OptimisticPhase, Order, OrderEntry, OrderId, OrderSide, OrderStatus, OrderTicket, OrderType,
    TimeInForce,
};

fn setup() -> (TerminalSync, Arc<InMemoryGateway>) {
    let gateway = Arc::new(InMemoryGateway::new());
    let terminal = TerminalSync::new(gateway.clone(), TerminalOptions::default());
    (terminal, gateway)
}

fn server_order(id: &str, status: OrderStatus) -> Order {
    Order {
        id: OrderId::new(id),
        client_order_id: None,
        symbol: Symbol::new("AAPL"),
        side: OrderSide::Buy,
        order_type: OrderType::Limit,
        quantity: dec!(10),
        limit_price: Some(dec!(180)),
        status,
        time_in_force: TimeInForce::Day,
    }
}

#[tokio::test]
async fn zero_quantity_fails_before_any_network_call() {
    let (terminal, gateway) = setup();

    let err = terminal
        .place_order(OrderTicket::market(Symbol::new("AAPL"), OrderSide::Buy, dec!(0)))
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::Validation(_)));
    assert!(gateway.placed_orders().is_empty());
    assert!(terminal.snapshot().orders.value.is_none());
}

#[tokio::test]
async fn market_order_drops_limit_price() {
    let (terminal, gateway) = setup();
    let ticket = OrderTicket {
        limit_price: Some(dec!(123.45)),
        ..OrderTicket::market(Symbol::new("AAPL"), OrderSide::Sell, dec!(3))
    };

    let order = terminal.place_order(ticket).await.unwrap();

    assert_eq!(order.limit_price, None);
    assert_eq!(gateway.placed_orders()[0].limit_price, None);
}

#[tokio::test(start_paused = true)]
async fn canceling_filled_order_is_invalid_state() {
    let (terminal, gateway) = setup();
    gateway.set_orders(vec![server_order("srv-7", OrderStatus::Filled)]);
    terminal.start();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let err = terminal
        .cancel_order(&OrderId::new("srv-7"))
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::InvalidState { .. }));
    assert_eq!(
        terminal.orders().status_of(&OrderId::new("srv-7")),
        Some(OrderStatus::Filled)
    );
    assert!(gateway.canceled_orders().is_empty());

    terminal.shutdown();
}

#[tokio::test(start_paused = true)]
async fn placed_order_is_confirmed_by_next_poll() {
    let (terminal, _gateway) = setup();
    terminal.start();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let order = terminal
        .place_order(OrderTicket::limit(
            Symbol::new("AAPL"),
            OrderSide::Buy,
            dec!(10),
            dec!(180.50),
        ))
        .await
        .unwrap();

    let snap = terminal.snapshot();
    let view = snap.orders.value.as_ref().unwrap();
    assert!(view[0].is_optimistic());
    assert_eq!(view[0].order().status, OrderStatus::Accepted);

    tokio::time::sleep(Duration::from_secs(5)).await;

    let snap = terminal.snapshot();
    let view = snap.orders.value.as_ref().unwrap();
    assert_eq!(view.len(), 1);
    assert!(!view[0].is_optimistic());
    assert_eq!(view[0].order().id, order.id);

    terminal.shutdown();
}

#[tokio::test(start_paused = true)]
async fn cancel_shows_canceled_until_poll_agrees() {
    let (terminal, gateway) = setup();
    gateway.set_orders(vec![server_order("srv-1", OrderStatus::Accepted)]);
    terminal.start();
    tokio::time::sleep(Duration::from_millis(10)).await;

    terminal.cancel_order(&OrderId::new("srv-1")).await.unwrap();

    assert_eq!(
        terminal.orders().status_of(&OrderId::new("srv-1")),
        Some(OrderStatus::Canceled)
    );
    assert_eq!(gateway.canceled_orders(), vec![OrderId::new("srv-1")]);

    tokio::time::sleep(Duration::from_secs(5)).await;

    let snap = terminal.snapshot();
    let view = snap.orders.value.as_ref().unwrap();
    assert_eq!(view.len(), 1);
    assert!(!view[0].is_optimistic());
    assert_eq!(view[0].order().status, OrderStatus::Canceled);

    terminal.shutdown();
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_cancel_reverts_to_polled_status_after_timeout() {
    let (terminal, gateway) = setup();
    let id = OrderId::new("srv-1");
    gateway.set_orders(vec![server_order("srv-1", OrderStatus::Accepted)]);
    terminal.start();
    tokio::time::sleep(Duration::from_millis(10)).await;

    terminal.cancel_order(&id).await.unwrap();
    gateway.set_orders(vec![server_order("srv-1", OrderStatus::Accepted)]);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(terminal.orders().status_of(&id), Some(OrderStatus::Canceled));
    assert!(matches!(
        terminal.cancel_order(&id).await,
        Err(OrderError::InvalidState { .. })
    ));

    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(terminal.orders().status_of(&id), Some(OrderStatus::Accepted));

    terminal.cancel_order(&id).await.unwrap();
    assert_eq!(gateway.canceled_orders(), vec![id.clone(), id]);

    terminal.shutdown();
}

#[tokio::test(start_paused = true)]
async fn refused_order_shows_rejected_then_disappears() {
    let (terminal, gateway) = setup();
    gateway.fail_next_order(GatewayError::RejectedByServer("insufficient buying power".into()));

    let err = terminal
        .place_order(OrderTicket::market(Symbol::new("AAPL"), OrderSide::Buy, dec!(1)))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        OrderError::RejectedByServer("insufficient buying power".into())
    );

    let snap = terminal.snapshot();
    let view = snap.orders.value.as_ref().unwrap();
    assert_eq!(view[0].order().status, OrderStatus::Rejected);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(terminal.snapshot().orders.value.as_ref().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn submitting_order_survives_missed_polls_until_timeout() {
    let (terminal, gateway) = setup();
    gateway.set_place_latency(Duration::from_secs(120));
    let orders = terminal.orders().clone();

    let submit = tokio::spawn(async move {
        orders
            .place(OrderTicket::market(Symbol::new("AAPL"), OrderSide::Buy, dec!(2)))
            .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    for _ in 0..3 {
        terminal.orders().reconcile(Vec::new());
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    let snap = terminal.snapshot();
    let view = snap.orders.value.as_ref().unwrap();
    assert_eq!(view.len(), 1);
    match &view[0] {
        OrderEntry::Optimistic(entry) => {
            assert_eq!(entry.phase, OptimisticPhase::Submitting);
            assert_eq!(entry.missed_polls, 3);
            assert_eq!(entry.order.status, OrderStatus::Pending);
        }
        OrderEntry::Confirmed(_) => panic!("expected an optimistic entry"),
    }

    tokio::time::sleep(Duration::from_secs(20)).await;
    let summary = terminal.orders().reconcile(Vec::new());

    assert_eq!(summary.expired, 1);
    assert!(terminal.snapshot().orders.value.as_ref().unwrap().is_empty());
    submit.abort();
}
