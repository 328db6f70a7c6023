//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `MarketGateway`: the remote trading and market-data API

mod in_memory_gateway;
mod market_gateway_port;

pub use in_memory_gateway::InMemoryGateway;
pub use market_gateway_port::{GatewayError, MarketGateway};
