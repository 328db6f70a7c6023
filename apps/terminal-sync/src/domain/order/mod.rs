//! Order Domain
//!
//! Order model, ticket validation, status transitions and the ledger that
//! merges optimistic local writes with polled server state.

mod ledger;
mod model;
mod state_machine;
mod value_objects;

pub use ledger::{
    DEFAULT_OPTIMISTIC_TIMEOUT, DEFAULT_REJECTED_RETENTION, LedgerSettings, OrderLedger,
    ReconcileSummary,
};
pub use model::{
    OptimisticOrder, OptimisticPhase, Order, OrderEntry, OrderId, OrderRequest, OrderTicket,
};
pub use state_machine::OrderStateMachine;
pub use value_objects::{OrderSide, OrderStatus, OrderType, TimeInForce};
