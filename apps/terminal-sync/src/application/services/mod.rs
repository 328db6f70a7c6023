//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `PollScheduler`: one reference-counted poll task per key
//! - `FeedRouter`: routes poll results through the normalizers into the store
//! - `OrderManager`: optimistic order submission, cancel and reconciliation
//! - `ScanService`: compiles and runs scans
//! - `TerminalSync`: the assembled core

mod feeds;
mod orders;
mod scan;
mod scheduler;
mod terminal;

pub use feeds::FeedRouter;
pub use orders::{OrderError, OrderManager};
pub use scan::{ScanError, ScanService, compile_scan};
pub use scheduler::{
    FeedHandler, FeedPayload, PollIntervals, PollOutcome, PollScheduler, SubscriptionHandle,
};
pub use terminal::{DEFAULT_MOVERS_LIMIT, TerminalOptions, TerminalSync};
