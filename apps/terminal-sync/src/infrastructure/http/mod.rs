//! REST adapter for the [`MarketGateway`](crate::application::ports::MarketGateway) port.
//!
//! All paths live under `{base_url}/api/v1`. An optional bearer token is
//! attached to every request.

mod api_types;
mod client;

pub use client::HttpGateway;
