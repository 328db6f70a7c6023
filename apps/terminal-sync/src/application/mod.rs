//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the state store, the application services and the
//! port interfaces that define how the core reaches the trading API.

/// Port interfaces for external systems (the trading API).
pub mod ports;

/// The state store and its snapshot model.
pub mod store;

/// Scheduler, order manager, scan service and the terminal facade.
pub mod services;
