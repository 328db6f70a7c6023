//! State Store
//!
//! The single source of truth for everything the terminal shows. The
//! published state is an immutable [`Snapshot`] behind an `Arc`; every
//! mutation clones it, replaces one subtree and swaps the pointer, so a
//! reader always sees a fully consistent value.
//!
//! # Notification
//!
//! After each applied mutation:
//! - synchronous listeners run in subscription order on the mutating task;
//!   a panicking listener is caught and logged and the rest still run
//! - the `watch` channel is updated for async consumers
//!
//! Applies are published one at a time, so listeners and the watch channel
//! observe versions in increasing order. A listener that applies a mutation
//! itself has it published before the remaining listeners run.
//!
//! Bars and depth are kept for the selected symbol only; selecting another
//! symbol drops the previous symbol's series and ladder.
//!
//! Mutations that change nothing (a stale bar series, for instance) do not
//! bump the version and notify nobody.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use rust_decimal::Decimal;
use tokio::sync::watch;

use crate::domain::depth::DepthLadder;
use crate::domain::market::{
    Bar, Mover, MoverKind, Position, Symbol, Timeframe, series_supersedes,
};
use crate::domain::order::OrderEntry;
use crate::domain::scan::ScanRow;
use crate::domain::subscription::PollKey;
use crate::infrastructure::metrics;

/// Symbols on a fresh watchlist.
pub const DEFAULT_WATCHLIST: [&str; 5] = ["AAPL", "MSFT", "GOOGL", "TSLA", "AMZN"];

/// Symbol selected on a fresh store.
pub const DEFAULT_SYMBOL: &str = "AAPL";

// =============================================================================
// Feed State
// =============================================================================

/// One polled feed: its last good value, when it arrived, and the current
/// error if the latest fetch failed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedState<T> {
    /// Last successfully fetched value.
    pub value: Option<T>,
    /// When `value` was written.
    pub updated_at: Option<DateTime<Utc>>,
    /// Error from the most recent failed fetch, cleared on success.
    pub error: Option<String>,
}

impl<T> Default for FeedState<T> {
    fn default() -> Self {
        Self {
            value: None,
            updated_at: None,
            error: None,
        }
    }
}

impl<T> FeedState<T> {
    /// A feed holding a fresh value.
    #[must_use]
    pub fn ready(value: T) -> Self {
        Self {
            value: Some(value),
            updated_at: Some(Utc::now()),
            error: None,
        }
    }

    /// Whether the latest fetch failed.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.error.is_some()
    }

    /// Whether a value has ever been written.
    #[must_use]
    pub const fn has_value(&self) -> bool {
        self.value.is_some()
    }

    fn succeed(&mut self, value: T) {
        self.value = Some(value);
        self.updated_at = Some(Utc::now());
        self.error = None;
    }

    fn fail(&mut self, error: String) {
        self.error = Some(error);
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// A consistent view of the whole terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Incremented on every applied mutation.
    pub version: u64,
    /// Symbol of interest.
    pub selected_symbol: Symbol,
    /// Chart timeframe.
    pub timeframe: Timeframe,
    /// Ordered, unique watchlist.
    pub watchlist: Vec<Symbol>,
    /// Positions feed.
    pub positions: FeedState<Vec<Position>>,
    /// Merged optimistic and confirmed orders.
    pub orders: FeedState<Vec<OrderEntry>>,
    /// Bars per symbol and timeframe.
    pub bars: HashMap<(Symbol, Timeframe), FeedState<Vec<Bar>>>,
    /// Depth ladder per symbol.
    pub depth: HashMap<Symbol, FeedState<DepthLadder>>,
    /// Movers lists.
    pub movers: HashMap<MoverKind, FeedState<Vec<Mover>>>,
    /// Latest scan results.
    pub scan: FeedState<Vec<ScanRow>>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: 0,
            selected_symbol: Symbol::new(DEFAULT_SYMBOL),
            timeframe: Timeframe::default(),
            watchlist: DEFAULT_WATCHLIST.iter().map(|s| Symbol::new(*s)).collect(),
            positions: FeedState::default(),
            orders: FeedState::default(),
            bars: HashMap::new(),
            depth: HashMap::new(),
            movers: HashMap::new(),
            scan: FeedState::default(),
        }
    }
}

impl Snapshot {
    /// Bars feed for a symbol and timeframe.
    #[must_use]
    pub fn bars_for(&self, symbol: &Symbol, timeframe: Timeframe) -> Option<&FeedState<Vec<Bar>>> {
        self.bars.get(&(symbol.clone(), timeframe))
    }

    /// Depth feed for a symbol.
    #[must_use]
    pub fn depth_for(&self, symbol: &Symbol) -> Option<&FeedState<DepthLadder>> {
        self.depth.get(symbol)
    }

    /// Close of the newest stored bar for a symbol, across timeframes.
    #[must_use]
    pub fn newest_close(&self, symbol: &Symbol) -> Option<Decimal> {
        self.bars
            .iter()
            .filter(|((s, _), _)| s == symbol)
            .filter_map(|(_, feed)| feed.value.as_ref()?.last())
            .max_by_key(|bar| bar.timestamp)
            .map(|bar| bar.close)
    }

    /// Whether any feed currently shows an error.
    #[must_use]
    pub fn has_degraded_feeds(&self) -> bool {
        self.positions.is_degraded()
            || self.orders.is_degraded()
            || self.scan.is_degraded()
            || self.bars.values().any(FeedState::is_degraded)
            || self.depth.values().any(FeedState::is_degraded)
            || self.movers.values().any(FeedState::is_degraded)
    }
}

// =============================================================================
// Mutations
// =============================================================================

/// A whole-subtree replacement or a feed error flag.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Change the symbol of interest.
    SelectSymbol(Symbol),
    /// Change the chart timeframe.
    SetTimeframe(Timeframe),
    /// Replace the watchlist.
    ReplaceWatchlist(Vec<Symbol>),
    /// Replace positions.
    ReplacePositions(Vec<Position>),
    /// Replace the merged orders view.
    ReplaceOrders(Vec<OrderEntry>),
    /// Replace a bar series. Ignored if older than the stored series.
    ReplaceBars {
        /// Symbol.
        symbol: Symbol,
        /// Timeframe.
        timeframe: Timeframe,
        /// Normalized series.
        bars: Vec<Bar>,
    },
    /// Replace a depth ladder.
    ReplaceDepth {
        /// Symbol.
        symbol: Symbol,
        /// Ladder.
        ladder: DepthLadder,
    },
    /// Replace a movers list.
    ReplaceMovers {
        /// Which list.
        kind: MoverKind,
        /// Rows.
        movers: Vec<Mover>,
    },
    /// Replace scan results.
    ReplaceScan(Vec<ScanRow>),
    /// Record a failed fetch for a polled feed. The last value is kept.
    FeedError {
        /// Feed that failed.
        key: PollKey,
        /// Error description.
        error: String,
    },
    /// Record a failed scan. The last results are kept.
    ScanError(String),
}

impl Mutation {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SelectSymbol(_) => "select_symbol",
            Self::SetTimeframe(_) => "set_timeframe",
            Self::ReplaceWatchlist(_) => "watchlist",
            Self::ReplacePositions(_) => "positions",
            Self::ReplaceOrders(_) => "orders",
            Self::ReplaceBars { .. } => "bars",
            Self::ReplaceDepth { .. } => "depth",
            Self::ReplaceMovers { .. } => "movers",
            Self::ReplaceScan(_) => "scan",
            Self::FeedError { .. } => "feed_error",
            Self::ScanError(_) => "scan_error",
        }
    }

    /// Apply to `snapshot`. Returns false if nothing changed.
    fn apply_to(self, snapshot: &mut Snapshot) -> bool {
        match self {
            Self::SelectSymbol(symbol) => {
                if snapshot.selected_symbol == symbol {
                    return false;
                }
                snapshot.bars.retain(|(s, _), _| *s == symbol);
                snapshot.depth.retain(|s, _| *s == symbol);
                snapshot.selected_symbol = symbol;
            }
            Self::SetTimeframe(timeframe) => {
                if snapshot.timeframe == timeframe {
                    return false;
                }
                snapshot.timeframe = timeframe;
            }
            Self::ReplaceWatchlist(watchlist) => {
                if snapshot.watchlist == watchlist {
                    return false;
                }
                snapshot.watchlist = watchlist;
            }
            Self::ReplacePositions(positions) => snapshot.positions.succeed(positions),
            Self::ReplaceOrders(orders) => snapshot.orders.succeed(orders),
            Self::ReplaceBars {
                symbol,
                timeframe,
                bars,
            } => {
                let feed = snapshot.bars.entry((symbol, timeframe)).or_default();
                let current = feed.value.as_deref().unwrap_or_default();
                if feed.has_value() && !series_supersedes(&bars, current) {
                    return false;
                }
                feed.succeed(bars);
            }
            Self::ReplaceDepth { symbol, ladder } => {
                snapshot.depth.entry(symbol).or_default().succeed(ladder);
            }
            Self::ReplaceMovers { kind, movers } => {
                snapshot.movers.entry(kind).or_default().succeed(movers);
            }
            Self::ReplaceScan(rows) => snapshot.scan.succeed(rows),
            Self::FeedError { key, error } => match key {
                PollKey::Bars { symbol, timeframe } => {
                    snapshot.bars.entry((symbol, timeframe)).or_default().fail(error);
                }
                PollKey::Depth { symbol } => snapshot.depth.entry(symbol).or_default().fail(error),
                PollKey::Orders => snapshot.orders.fail(error),
                PollKey::Positions => snapshot.positions.fail(error),
                PollKey::Movers { kind, .. } => snapshot.movers.entry(kind).or_default().fail(error),
            },
            Self::ScanError(error) => snapshot.scan.fail(error),
        }
        true
    }
}

// =============================================================================
// Store
// =============================================================================

/// Identifier returned by [`Store::subscribe`].
pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// The terminal's state store.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use terminal_sync::application::store::Store;
///
/// let store = Store::new();
/// let seen = Arc::new(AtomicU64::new(0));
///
/// let seen_by_listener = seen.clone();
/// let id = store.subscribe(move |snapshot| {
///     seen_by_listener.store(snapshot.version, Ordering::SeqCst);
/// });
///
/// assert_eq!(store.snapshot().version, 0);
/// store.unsubscribe(id);
/// ```
pub struct Store {
    current: RwLock<Arc<Snapshot>>,
    publish_gate: ReentrantMutex<()>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: Mutex<ListenerId>,
    watch_tx: watch::Sender<Arc<Snapshot>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("version", &self.current.read().version)
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl Store {
    /// Create a store with default contents.
    #[must_use]
    pub fn new() -> Self {
        Self::with_snapshot(Snapshot::default())
    }

    /// Create a store seeded with `snapshot`.
    #[must_use]
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        let snapshot = Arc::new(snapshot);
        let (watch_tx, _) = watch::channel(Arc::clone(&snapshot));
        Self {
            current: RwLock::new(snapshot),
            publish_gate: ReentrantMutex::new(()),
            listeners: Mutex::new(Vec::new()),
            next_listener: Mutex::new(0),
            watch_tx,
        }
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    /// Register a synchronous listener. Listeners run in registration order.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let id = {
            let mut next = self.next_listener.lock();
            *next += 1;
            *next
        };
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Receiver that observes every published snapshot.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.watch_tx.subscribe()
    }

    /// Apply a mutation and notify observers.
    ///
    /// Returns false if the mutation changed nothing.
    pub(crate) fn apply(&self, mutation: Mutation) -> bool {
        let kind = mutation.kind();
        let _publishing = self.publish_gate.lock();

        let published = {
            let mut current = self.current.write();
            let mut next = Snapshot::clone(&current);
            if !mutation.apply_to(&mut next) {
                return false;
            }
            next.version = current.version + 1;
            let next = Arc::new(next);
            *current = Arc::clone(&next);
            next
        };

        metrics::record_store_mutation(kind);
        tracing::trace!(kind, version = published.version, "Store updated");

        self.notify(&published);
        self.watch_tx.send_if_modified(|latest| {
            if latest.version < published.version {
                *latest = published;
                true
            } else {
                false
            }
        });
        true
    }

    fn notify(&self, snapshot: &Snapshot) {
        let listeners: Vec<(ListenerId, Listener)> = self.listeners.lock().clone();

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(snapshot))).is_err() {
                tracing::error!(
                    listener_id = id,
                    version = snapshot.version,
                    "Store listener panicked"
                );
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
