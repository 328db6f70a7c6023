//! Market Data Types
//!
//! Core domain types for the polled market feeds: symbols, chart bars,
//! raw depth snapshots, positions and market movers. These are the
//! canonical internal representation; the HTTP adapter maps API payloads
//! into them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::errors::ValidationError;

// =============================================================================
// Symbol
// =============================================================================

/// A trading symbol, normalized to uppercase.
///
/// Identity key for all per-symbol state (depth, bars, watchlist).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol from trusted input, uppercasing it.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().to_uppercase())
    }

    /// Parse user input into a symbol.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidSymbol` if the input is empty after
    /// trimming or contains interior whitespace.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidSymbol(value.to_string()));
        }
        Ok(Self::new(trimmed))
    }

    /// Get the symbol string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Timeframe
// =============================================================================

/// Chart timeframe for bar requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Timeframe {
    /// One-minute bars.
    #[serde(rename = "1Min")]
    OneMinute,
    /// Five-minute bars.
    #[serde(rename = "5Min")]
    FiveMinutes,
    /// Fifteen-minute bars.
    #[serde(rename = "15Min")]
    FifteenMinutes,
    /// Hourly bars.
    #[serde(rename = "1H")]
    OneHour,
    /// Daily bars.
    #[default]
    #[serde(rename = "1D")]
    OneDay,
}

impl Timeframe {
    /// All supported timeframes, shortest first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::OneMinute,
            Self::FiveMinutes,
            Self::FifteenMinutes,
            Self::OneHour,
            Self::OneDay,
        ]
    }

    /// Wire representation used by the API.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1Min",
            Self::FiveMinutes => "5Min",
            Self::FifteenMinutes => "15Min",
            Self::OneHour => "1H",
            Self::OneDay => "1D",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|tf| tf.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::UnsupportedTimeframe(s.to_string()))
    }
}

// =============================================================================
// Bars
// =============================================================================

/// An OHLCV bar. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Symbol the bar belongs to.
    pub symbol: Symbol,
    /// Bar open time.
    pub timestamp: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Traded volume.
    pub volume: u64,
}

/// Sort bars ascending by timestamp, collapsing duplicates.
///
/// When two bars share a timestamp the one that appeared later in the
/// input wins, so a refreshed in-progress bar replaces its earlier copy.
#[must_use]
pub fn normalize_bars(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|bar| bar.timestamp);

    let mut normalized: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match normalized.last_mut() {
            Some(last) if last.timestamp == bar.timestamp => *last = bar,
            _ => normalized.push(bar),
        }
    }
    normalized
}

/// Whether a freshly polled series may replace the stored one.
///
/// A series whose newest bar is older than the stored newest bar is a
/// late response and must not regress the chart. An empty incoming series
/// never replaces a non-empty one.
#[must_use]
pub fn series_supersedes(incoming: &[Bar], current: &[Bar]) -> bool {
    match (incoming.last(), current.last()) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(new), Some(old)) => new.timestamp >= old.timestamp,
    }
}

// =============================================================================
// Depth
// =============================================================================

/// A single raw price level as returned by the depth endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Quoted price.
    pub price: Decimal,
    /// Size at that price.
    pub size: u64,
}

impl PriceLevel {
    /// Create a new price level.
    #[must_use]
    pub const fn new(price: Decimal, size: u64) -> Self {
        Self { price, size }
    }
}

/// Raw depth-of-book snapshot, each side sorted best-to-worst.
///
/// Sides may have different lengths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDepth {
    /// Bid levels, best (highest) first.
    pub bids: Vec<PriceLevel>,
    /// Ask levels, best (lowest) first.
    pub asks: Vec<PriceLevel>,
}

impl RawDepth {
    /// Midpoint of the best bid and ask, if both sides are present.
    #[must_use]
    pub fn midpoint(&self) -> Option<Decimal> {
        let bid = self.bids.first()?.price;
        let ask = self.asks.first()?.price;
        Some((bid + ask) / Decimal::TWO)
    }
}

// =============================================================================
// Positions
// =============================================================================

/// An account position. Overwritten wholesale by each positions poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Position symbol.
    pub symbol: Symbol,
    /// Signed quantity (negative for short).
    pub quantity: Decimal,
    /// Average cost per unit.
    pub average_cost: Decimal,
}

// =============================================================================
// Movers
// =============================================================================

/// Which market-movers list to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoverKind {
    /// Top percentage gainers.
    Gainers,
    /// Top percentage losers.
    Losers,
    /// Highest volume.
    MostActive,
}

impl MoverKind {
    /// All mover lists.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Gainers, Self::Losers, Self::MostActive]
    }

    /// Label used in logs, metrics and API paths.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Gainers => "gainers",
            Self::Losers => "losers",
            Self::MostActive => "most-active",
        }
    }
}

impl fmt::Display for MoverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a market-movers list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mover {
    /// Symbol.
    pub symbol: Symbol,
    /// Last price.
    pub price: Decimal,
    /// Percentage change on the day.
    pub change_percent: Decimal,
    /// Volume on the day.
    pub volume: u64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn bar(minute: u32, close: Decimal) -> Bar {
        Bar {
            symbol: Symbol::new("AAPL"),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 14, minute, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 100,
        }
    }

    #[test]
    fn test_symbol_is_uppercased() {
        assert_eq!(Symbol::new("aapl").as_str(), "AAPL");
    }

    #[test]
    fn test_symbol_parse_rejects_blank_and_spaces() {
        assert!(Symbol::parse("").is_err());
        assert!(Symbol::parse("   ").is_err());
        assert!(Symbol::parse("BRK B").is_err());
        assert_eq!(Symbol::parse(" msft ").unwrap(), Symbol::new("MSFT"));
    }

    #[test]
    fn test_timeframe_round_trips_wire_names() {
        for tf in Timeframe::all() {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), *tf);
        }
        assert_eq!("1h".parse::<Timeframe>().unwrap(), Timeframe::OneHour);
        assert!("2H".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_timeframe_serde_uses_wire_names() {
        let json = serde_json::to_string(&Timeframe::FifteenMinutes).unwrap();
        assert_eq!(json, "\"15Min\"");
    }

    #[test]
    fn test_normalize_bars_sorts_and_dedupes_keeping_latest_copy() {
        let bars = vec![bar(2, dec!(3)), bar(1, dec!(1)), bar(2, dec!(4))];

        let normalized = normalize_bars(bars);

        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].close, dec!(1));
        assert_eq!(normalized[1].close, dec!(4));
    }

    #[test]
    fn test_older_series_does_not_supersede() {
        let current = vec![bar(1, dec!(1)), bar(5, dec!(2))];
        let late = vec![bar(1, dec!(1)), bar(4, dec!(2))];
        let fresh = vec![bar(5, dec!(3))];

        assert!(!series_supersedes(&late, &current));
        assert!(series_supersedes(&fresh, &current));
        assert!(!series_supersedes(&[], &current));
        assert!(series_supersedes(&late, &[]));
    }

    #[test]
    fn test_depth_midpoint_requires_both_sides() {
        let depth = RawDepth {
            bids: vec![PriceLevel::new(dec!(174.9), 50)],
            asks: vec![PriceLevel::new(dec!(175.1), 40)],
        };
        assert_eq!(depth.midpoint(), Some(dec!(175.0)));

        let one_sided = RawDepth {
            bids: vec![PriceLevel::new(dec!(174.9), 50)],
            asks: vec![],
        };
        assert_eq!(one_sided.midpoint(), None);
    }

    #[test]
    fn test_mover_kind_labels() {
        assert_eq!(MoverKind::Gainers.as_str(), "gainers");
        assert_eq!(MoverKind::MostActive.as_str(), "most-active");
        assert_eq!(MoverKind::all().len(), 3);
    }
}
