//! Depth Ladder Normalization
//!
//! Turns an asymmetric raw depth snapshot into a fixed-size price ladder
//! centered on a reference price. The ladder is regenerated wholesale on
//! every poll and is a pure function of its inputs.
//!
//! Level `i` is priced at `quantize(reference) + (center_offset - i) * tick`
//! with `center_offset = levels / 2`, so level 0 is the highest price.

use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::market::RawDepth;

/// Default number of ladder rows.
pub const DEFAULT_LEVELS: usize = 20;

/// Default tick size (0.10).
pub const DEFAULT_TICK: Decimal = Decimal::from_parts(10, 0, 0, false, 2);

/// Reference used when neither bars nor a two-sided book are available.
pub const DEFAULT_FALLBACK_REFERENCE: Decimal = Decimal::from_parts(17500, 0, 0, false, 2);

// =============================================================================
// Configuration
// =============================================================================

/// How raw levels are placed onto ladder rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LadderAlignment {
    /// Raw level `i` feeds ladder row `i` regardless of its quoted price.
    #[default]
    IndexAligned,
    /// Raw levels are bucketed into the row matching their quantized price.
    PriceAligned,
}

impl fmt::Display for LadderAlignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IndexAligned => write!(f, "index"),
            Self::PriceAligned => write!(f, "price"),
        }
    }
}

impl FromStr for LadderAlignment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "index" | "index_aligned" => Ok(Self::IndexAligned),
            "price" | "price_aligned" => Ok(Self::PriceAligned),
            other => Err(format!("unknown ladder alignment: {other}")),
        }
    }
}

/// Ladder shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LadderConfig {
    /// Number of rows produced.
    pub levels: usize,
    /// Price increment between adjacent rows. Must be positive.
    pub tick: Decimal,
    /// Row placement mode.
    pub alignment: LadderAlignment,
    /// Reference price of last resort.
    pub fallback_reference: Decimal,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            levels: DEFAULT_LEVELS,
            tick: DEFAULT_TICK,
            alignment: LadderAlignment::default(),
            fallback_reference: DEFAULT_FALLBACK_REFERENCE,
        }
    }
}

impl LadderConfig {
    /// Row index of the reference price.
    #[must_use]
    pub const fn center_offset(&self) -> usize {
        self.levels / 2
    }

    /// Round a price to the nearest tick, halves away from zero.
    ///
    /// A non-positive tick leaves the price untouched.
    #[must_use]
    pub fn quantize(&self, price: Decimal) -> Decimal {
        if self.tick <= Decimal::ZERO {
            return price;
        }
        let ticks = (price / self.tick)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        (ticks * self.tick).normalize()
    }

    /// Price of ladder row `index` for an already quantized reference.
    #[must_use]
    pub fn level_price(&self, reference: Decimal, index: usize) -> Decimal {
        let steps = Decimal::from(self.center_offset()) - Decimal::from(index);
        (reference + steps * self.tick).normalize()
    }

    /// Row that a quantized price falls into, if it lies on the ladder.
    fn row_for_price(&self, reference: Decimal, price: Decimal) -> Option<usize> {
        if self.tick <= Decimal::ZERO {
            return None;
        }
        let steps_above = (self.quantize(price) - reference) / self.tick;
        let row = (Decimal::from(self.center_offset()) - steps_above.round()).to_usize()?;
        (row < self.levels).then_some(row)
    }
}

// =============================================================================
// Ladder
// =============================================================================

/// One ladder row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    /// Row price, an exact multiple of the tick.
    pub price: Decimal,
    /// Bid size shown at this row.
    pub bid_size: u64,
    /// Ask size shown at this row.
    pub ask_size: u64,
}

/// A fixed-size ladder, highest price first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLadder {
    /// Quantized reference price the ladder is centered on.
    pub reference: Decimal,
    /// Ladder rows.
    pub levels: Vec<DepthLevel>,
}

impl DepthLadder {
    /// Total bid size across the ladder.
    #[must_use]
    pub fn total_bid_size(&self) -> u64 {
        self.levels.iter().map(|l| l.bid_size).sum()
    }

    /// Total ask size across the ladder.
    #[must_use]
    pub fn total_ask_size(&self) -> u64 {
        self.levels.iter().map(|l| l.ask_size).sum()
    }
}

/// Pick the price a ladder is centered on.
///
/// Preference order: newest bar close, best bid/ask midpoint, configured
/// fallback.
#[must_use]
pub fn select_reference(
    newest_close: Option<Decimal>,
    raw: &RawDepth,
    config: &LadderConfig,
) -> Decimal {
    newest_close
        .or_else(|| raw.midpoint())
        .unwrap_or(config.fallback_reference)
}

/// Build a ladder of exactly `config.levels` rows from a raw snapshot.
#[must_use]
pub fn normalize_depth(raw: &RawDepth, reference: Decimal, config: &LadderConfig) -> DepthLadder {
    let reference = config.quantize(reference);

    let mut levels: Vec<DepthLevel> = (0..config.levels)
        .map(|i| DepthLevel {
            price: config.level_price(reference, i),
            bid_size: 0,
            ask_size: 0,
        })
        .collect();

    match config.alignment {
        LadderAlignment::IndexAligned => {
            for (row, level) in levels.iter_mut().enumerate() {
                level.bid_size = raw.bids.get(row).map_or(0, |l| l.size);
                level.ask_size = raw.asks.get(row).map_or(0, |l| l.size);
            }
        }
        LadderAlignment::PriceAligned => {
            for bid in &raw.bids {
                if let Some(row) = config.row_for_price(reference, bid.price) {
                    levels[row].bid_size = levels[row].bid_size.saturating_add(bid.size);
                }
            }
            for ask in &raw.asks {
                if let Some(row) = config.row_for_price(reference, ask.price) {
                    levels[row].ask_size = levels[row].ask_size.saturating_add(ask.size);
                }
            }
        }
    }

    DepthLadder { reference, levels }
}

// =============================================================================
// Tests
// =============================================================================
