//! Poll Subscription Types
//!
//! Domain types for tracking which consumers need which polled feeds.
//!
//! # Design
//!
//! The registry tracks:
//! - Which key each subscription handle currently points at
//! - Reference counting per key, so that many subscribers share one task
//!
//! Keys are typed by data source ([`PollKey`]), so a depth subscription can
//! never carry a bars key. The registry only reports lifecycle changes
//! (start a task for a key, stop a task for a key); the scheduler owns the
//! actual tasks.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use super::market::{MoverKind, Symbol, Timeframe};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a subscription handle.
pub type SubscriptionId = u64;

/// The kind of remote data a poll task fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSource {
    /// OHLCV bars.
    Bars,
    /// Depth of book.
    Depth,
    /// Account orders.
    Orders,
    /// Account positions.
    Positions,
    /// Market movers lists.
    Movers,
}

impl DataSource {
    /// All data sources.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Bars,
            Self::Depth,
            Self::Orders,
            Self::Positions,
            Self::Movers,
        ]
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bars => "bars",
            Self::Depth => "depth",
            Self::Orders => "orders",
            Self::Positions => "positions",
            Self::Movers => "movers",
        }
    }

    /// Poll interval used when neither the subscriber nor configuration
    /// supplies one.
    #[must_use]
    pub const fn default_interval(&self) -> Duration {
        match self {
            Self::Bars => Duration::from_secs(60),
            Self::Depth => Duration::from_secs(1),
            Self::Orders | Self::Positions => Duration::from_secs(5),
            Self::Movers => Duration::from_secs(30),
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a poll task: a data source plus its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PollKey {
    /// Bars for one symbol and timeframe.
    Bars {
        /// Symbol.
        symbol: Symbol,
        /// Timeframe.
        timeframe: Timeframe,
    },
    /// Depth for one symbol.
    Depth {
        /// Symbol.
        symbol: Symbol,
    },
    /// The account's order list.
    Orders,
    /// The account's positions.
    Positions,
    /// One movers list.
    Movers {
        /// Which list.
        kind: MoverKind,
        /// Row count.
        limit: usize,
    },
}

impl PollKey {
    /// Bars key.
    #[must_use]
    pub const fn bars(symbol: Symbol, timeframe: Timeframe) -> Self {
        Self::Bars { symbol, timeframe }
    }

    /// Depth key.
    #[must_use]
    pub const fn depth(symbol: Symbol) -> Self {
        Self::Depth { symbol }
    }

    /// Movers key.
    #[must_use]
    pub const fn movers(kind: MoverKind, limit: usize) -> Self {
        Self::Movers { kind, limit }
    }

    /// The data source this key belongs to.
    #[must_use]
    pub const fn source(&self) -> DataSource {
        match self {
            Self::Bars { .. } => DataSource::Bars,
            Self::Depth { .. } => DataSource::Depth,
            Self::Orders => DataSource::Orders,
            Self::Positions => DataSource::Positions,
            Self::Movers { .. } => DataSource::Movers,
        }
    }

    /// Symbol the key is scoped to, if any.
    #[must_use]
    pub const fn symbol(&self) -> Option<&Symbol> {
        match self {
            Self::Bars { symbol, .. } | Self::Depth { symbol } => Some(symbol),
            _ => None,
        }
    }
}

impl fmt::Display for PollKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bars { symbol, timeframe } => write!(f, "bars:{symbol}:{timeframe}"),
            Self::Depth { symbol } => write!(f, "depth:{symbol}"),
            Self::Orders => write!(f, "orders"),
            Self::Positions => write!(f, "positions"),
            Self::Movers { kind, limit } => write!(f, "movers:{kind}:{limit}"),
        }
    }
}

// =============================================================================
// Registry Changes
// =============================================================================

/// Task lifecycle changes caused by a registry update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryChanges {
    /// Key whose task must be started (refcount went 0→1).
    pub start: Option<PollKey>,
    /// Key whose task must be stopped (refcount went 1→0).
    pub stop: Option<PollKey>,
}

impl RegistryChanges {
    /// Check if there are any changes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start.is_none() && self.stop.is_none()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Tracks subscriptions and per-key reference counts.
///
/// # Example
///
/// ```rust
/// use terminal_sync::domain::subscription::{PollKey, PollRegistry};
///
/// let mut registry = PollRegistry::new();
///
/// // First subscriber starts the task
/// let (first, changes) = registry.add(PollKey::Orders);
/// assert_eq!(changes.start, Some(PollKey::Orders));
///
/// // Second subscriber shares it
/// let (second, changes) = registry.add(PollKey::Orders);
/// assert!(changes.is_empty());
///
/// // Task stops only when the last subscriber leaves
/// assert!(registry.remove(first).is_empty());
/// assert_eq!(registry.remove(second).stop, Some(PollKey::Orders));
/// ```
#[derive(Debug, Default)]
pub struct PollRegistry {
    /// Map from subscription ID to the key it points at.
    subscriber_keys: HashMap<SubscriptionId, PollKey>,
    /// Map from key to reference count.
    key_refcount: HashMap<PollKey, usize>,
    next_id: SubscriptionId,
}

impl PollRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber for `key`.
    ///
    /// Returns the subscriber's id and whether a task must be started.
    pub fn add(&mut self, key: PollKey) -> (SubscriptionId, RegistryChanges) {
        self.next_id += 1;
        let id = self.next_id;

        let changes = RegistryChanges {
            start: self.acquire(&key),
            stop: None,
        };
        self.subscriber_keys.insert(id, key);

        (id, changes)
    }

    /// Remove a subscriber.
    ///
    /// Unknown ids are ignored.
    pub fn remove(&mut self, id: SubscriptionId) -> RegistryChanges {
        let Some(key) = self.subscriber_keys.remove(&id) else {
            return RegistryChanges::default();
        };

        RegistryChanges {
            start: None,
            stop: self.release(&key),
        }
    }

    /// Point an existing subscriber at a different key.
    ///
    /// Returns `None` for an unknown id. Moving to the same key is a no-op.
    pub fn rekey(&mut self, id: SubscriptionId, new_key: PollKey) -> Option<RegistryChanges> {
        let old_key = self.subscriber_keys.get(&id)?.clone();
        if old_key == new_key {
            return Some(RegistryChanges::default());
        }

        let start = self.acquire(&new_key);
        let stop = self.release(&old_key);
        self.subscriber_keys.insert(id, new_key);

        Some(RegistryChanges { start, stop })
    }

    /// Key a subscriber currently points at.
    #[must_use]
    pub fn key_of(&self, id: SubscriptionId) -> Option<&PollKey> {
        self.subscriber_keys.get(&id)
    }

    /// Number of subscribers sharing `key`.
    #[must_use]
    pub fn refcount(&self, key: &PollKey) -> usize {
        self.key_refcount.get(key).copied().unwrap_or(0)
    }

    /// All keys with at least one subscriber.
    #[must_use]
    pub fn active_keys(&self) -> Vec<PollKey> {
        self.key_refcount.keys().cloned().collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut per_source = HashMap::new();
        for key in self.key_refcount.keys() {
            *per_source.entry(key.source()).or_insert(0) += 1;
        }
        RegistryStats {
            task_count: self.key_refcount.len(),
            subscriber_count: self.subscriber_keys.len(),
            per_source,
        }
    }

    /// Increment the refcount. Returns the key if it went 0→1.
    fn acquire(&mut self, key: &PollKey) -> Option<PollKey> {
        let refcount = self.key_refcount.entry(key.clone()).or_insert(0);
        *refcount += 1;
        (*refcount == 1).then(|| key.clone())
    }

    /// Decrement the refcount. Returns the key if it went 1→0.
    fn release(&mut self, key: &PollKey) -> Option<PollKey> {
        let refcount = self.key_refcount.get_mut(key)?;
        *refcount = refcount.saturating_sub(1);

        if *refcount == 0 {
            self.key_refcount.remove(key);
            return Some(key.clone());
        }
        None
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of distinct keys, i.e. live tasks.
    pub task_count: usize,
    /// Number of subscription handles.
    pub subscriber_count: usize,
    /// Live tasks per data source.
    pub per_source: HashMap<DataSource, usize>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn depth(symbol: &str) -> PollKey {
        PollKey::depth(Symbol::new(symbol))
    }

    #[test]
    fn add_subscription_new_key() {
        let mut registry = PollRegistry::new();

        let (_, changes) = registry.add(depth("AAPL"));

        assert_eq!(changes.start, Some(depth("AAPL")));
        assert!(changes.stop.is_none());
    }

    #[test]
    fn add_subscription_existing_key() {
        let mut registry = PollRegistry::new();

        registry.add(depth("AAPL"));
        let (_, changes) = registry.add(depth("AAPL"));

        assert!(changes.is_empty());
        assert_eq!(registry.refcount(&depth("AAPL")), 2);
    }

    #[test]
    fn remove_subscription_with_remaining_subscribers() {
        let mut registry = PollRegistry::new();

        let (first, _) = registry.add(depth("AAPL"));
        registry.add(depth("AAPL"));

        let changes = registry.remove(first);

        assert!(changes.is_empty());
        assert_eq!(registry.refcount(&depth("AAPL")), 1);
    }

    #[test]
    fn remove_subscription_last_subscriber() {
        let mut registry = PollRegistry::new();

        let (id, _) = registry.add(depth("AAPL"));
        let changes = registry.remove(id);

        assert_eq!(changes.stop, Some(depth("AAPL")));
        assert!(registry.active_keys().is_empty());
    }

    #[test]
    fn remove_unknown_subscriber_is_noop() {
        let mut registry = PollRegistry::new();
        assert!(registry.remove(42).is_empty());
    }

    #[test]
    fn rekey_moves_refcount() {
        let mut registry = PollRegistry::new();

        let (id, _) = registry.add(depth("AAPL"));
        let changes = registry.rekey(id, depth("MSFT")).unwrap();

        assert_eq!(changes.start, Some(depth("MSFT")));
        assert_eq!(changes.stop, Some(depth("AAPL")));
        assert_eq!(registry.key_of(id), Some(&depth("MSFT")));
    }

    #[test]
    fn rekey_onto_shared_key_starts_nothing() {
        let mut registry = PollRegistry::new();

        let (a, _) = registry.add(depth("AAPL"));
        let (_b, _) = registry.add(depth("MSFT"));
        let changes = registry.rekey(a, depth("MSFT")).unwrap();

        assert!(changes.start.is_none());
        assert_eq!(changes.stop, Some(depth("AAPL")));
        assert_eq!(registry.refcount(&depth("MSFT")), 2);
    }

    #[test]
    fn rekey_to_same_key_is_noop() {
        let mut registry = PollRegistry::new();

        let (id, _) = registry.add(depth("AAPL"));

        assert!(registry.rekey(id, depth("AAPL")).unwrap().is_empty());
        assert_eq!(registry.refcount(&depth("AAPL")), 1);
    }

    #[test]
    fn rekey_unknown_subscriber() {
        let mut registry = PollRegistry::new();
        assert!(registry.rekey(7, PollKey::Orders).is_none());
    }

    #[test]
    fn stats_count_tasks_and_subscribers() {
        let mut registry = PollRegistry::new();

        registry.add(depth("AAPL"));
        registry.add(depth("AAPL"));
        registry.add(PollKey::Orders);

        let stats = registry.stats();

        assert_eq!(stats.task_count, 2);
        assert_eq!(stats.subscriber_count, 3);
        assert_eq!(stats.per_source.get(&DataSource::Depth), Some(&1));
        assert_eq!(stats.per_source.get(&DataSource::Orders), Some(&1));
    }

    #[test]
    fn key_source_and_display() {
        let key = PollKey::bars(Symbol::new("aapl"), Timeframe::OneDay);
        assert_eq!(key.source(), DataSource::Bars);
        assert_eq!(key.to_string(), "bars:AAPL:1D");
        assert_eq!(key.symbol(), Some(&Symbol::new("AAPL")));

        let movers = PollKey::movers(MoverKind::Losers, 20);
        assert_eq!(movers.to_string(), "movers:losers:20");
        assert_eq!(movers.symbol(), None);
    }

    #[test]
    fn default_intervals() {
        assert_eq!(DataSource::Bars.default_interval(), Duration::from_secs(60));
        assert_eq!(DataSource::Depth.default_interval(), Duration::from_secs(1));
        assert_eq!(DataSource::Orders.default_interval(), Duration::from_secs(5));
        assert_eq!(DataSource::Positions.default_interval(), Duration::from_secs(5));
        assert_eq!(DataSource::Movers.default_interval(), Duration::from_secs(30));
    }
}
