//! Domain Layer - Core market, order and subscription types.
//!
//! This layer contains the pure types and rules of the sync core:
//! value objects, validation, the depth ladder, the order ledger and the
//! poll subscription registry. Nothing here performs I/O or reads a clock.

/// Market data types (symbols, bars, depth, positions, movers).
pub mod market;

/// Depth ladder normalization.
pub mod depth;

/// Orders, tickets and optimistic/confirmed reconciliation.
pub mod order;

/// Scanner filters, requests and results.
pub mod scan;

/// Poll subscription tracking and reference counting.
pub mod subscription;

/// Validation errors.
pub mod errors;

pub use errors::ValidationError;
