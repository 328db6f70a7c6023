//! Sync Configuration Settings
//!
//! Configuration types for the terminal sync core, loaded from environment
//! variables.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::application::services::{DEFAULT_MOVERS_LIMIT, PollIntervals, TerminalOptions};
use crate::domain::depth::{LadderAlignment, LadderConfig};
use crate::domain::market::{Symbol, Timeframe};
use crate::domain::order::LedgerSettings;
use crate::domain::scan::DEFAULT_MAX_LIMIT;
use crate::domain::subscription::DataSource;

/// Default trading API base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Bearer token for the trading API.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    /// Wrap a token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Trading API connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    /// Base URL, without the `/api/v1` prefix.
    pub base_url: String,
    /// Optional bearer token.
    pub token: Option<ApiToken>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            token: None,
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

/// Complete sync configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Trading API settings.
    pub api: ApiSettings,
    /// Core settings handed to the facade.
    pub terminal: TerminalOptions,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api: ApiSettings::default(),
            terminal: TerminalOptions::default(),
            metrics_port: 0,
        }
    }
}

impl SyncConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an empty or malformed value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// Unset keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a key is set to an empty or malformed value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let defaults = Self::default();

        let api = ApiSettings {
            base_url: env
                .string("TERMINAL_API_URL")?
                .map_or(defaults.api.base_url, |url| url.trim_end_matches('/').to_string()),
            token: env.string("TERMINAL_API_TOKEN")?.map(ApiToken::new),
            timeout: env
                .parse::<u64>("TERMINAL_HTTP_TIMEOUT_MS")?
                .map_or(defaults.api.timeout, Duration::from_millis),
        };

        let d = defaults.terminal;
        let interval = |key: &str, source: DataSource| -> Result<Duration, ConfigError> {
            match env.parse::<u64>(key)? {
                Some(0) => Err(ConfigError::invalid(key, "0", "must be positive")),
                Some(ms) => Ok(Duration::from_millis(ms)),
                None => Ok(d.intervals.for_source(source)),
            }
        };
        let intervals = PollIntervals {
            bars: interval("TERMINAL_POLL_BARS_MS", DataSource::Bars)?,
            depth: interval("TERMINAL_POLL_DEPTH_MS", DataSource::Depth)?,
            orders: interval("TERMINAL_POLL_ORDERS_MS", DataSource::Orders)?,
            positions: interval("TERMINAL_POLL_POSITIONS_MS", DataSource::Positions)?,
            movers: interval("TERMINAL_POLL_MOVERS_MS", DataSource::Movers)?,
        };

        let ladder = LadderConfig {
            levels: env
                .parse::<usize>("TERMINAL_LADDER_LEVELS")?
                .unwrap_or(d.ladder.levels),
            tick: env
                .parse::<Decimal>("TERMINAL_LADDER_TICK")?
                .unwrap_or(d.ladder.tick),
            alignment: env
                .parse::<LadderAlignment>("TERMINAL_LADDER_ALIGNMENT")?
                .unwrap_or(d.ladder.alignment),
            fallback_reference: env
                .parse::<Decimal>("TERMINAL_LADDER_FALLBACK_REFERENCE")?
                .unwrap_or(d.ladder.fallback_reference),
        };
        if ladder.levels == 0 {
            return Err(ConfigError::invalid("TERMINAL_LADDER_LEVELS", "0", "must be positive"));
        }
        if ladder.tick <= Decimal::ZERO {
            return Err(ConfigError::invalid(
                "TERMINAL_LADDER_TICK",
                &ladder.tick.to_string(),
                "must be positive",
            ));
        }

        let ledger = LedgerSettings {
            optimistic_timeout: env
                .parse::<u64>("TERMINAL_ORDER_OPTIMISTIC_TIMEOUT_SECS")?
                .map_or(d.ledger.optimistic_timeout, Duration::from_secs),
            rejected_retention: env
                .parse::<u64>("TERMINAL_ORDER_REJECTED_RETENTION_SECS")?
                .map_or(d.ledger.rejected_retention, Duration::from_secs),
        };

        let symbol = match env.string("TERMINAL_SYMBOL")? {
            Some(raw) => Symbol::parse(&raw)
                .map_err(|e| ConfigError::invalid("TERMINAL_SYMBOL", &raw, &e.to_string()))?,
            None => d.symbol,
        };
        let watchlist = match env.string("TERMINAL_WATCHLIST")? {
            Some(raw) => parse_watchlist(&raw)?,
            None => d.watchlist,
        };

        let terminal = TerminalOptions {
            intervals,
            ladder,
            ledger,
            scan_max_limit: env
                .parse::<usize>("TERMINAL_SCAN_MAX_LIMIT")?
                .unwrap_or(DEFAULT_MAX_LIMIT),
            movers_limit: env
                .parse::<usize>("TERMINAL_MOVERS_LIMIT")?
                .unwrap_or(DEFAULT_MOVERS_LIMIT),
            symbol,
            watchlist,
            timeframe: env
                .parse::<Timeframe>("TERMINAL_TIMEFRAME")?
                .unwrap_or(d.timeframe),
        };

        Ok(Self {
            api,
            terminal,
            metrics_port: env.parse::<u16>("TERMINAL_METRICS_PORT")?.unwrap_or(0),
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// Parse failure.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str, reason: &str) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match (self.lookup)(key) {
            None => Ok(None),
            Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(v) => Ok(Some(v.trim().to_string())),
        }
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)?
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| ConfigError::invalid(key, &raw, &e.to_string()))
            })
            .transpose()
    }
}

fn parse_watchlist(raw: &str) -> Result<Vec<Symbol>, ConfigError> {
    let mut watchlist: Vec<Symbol> = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let symbol = Symbol::parse(part)
            .map_err(|e| ConfigError::invalid("TERMINAL_WATCHLIST", raw, &e.to_string()))?;
        if !watchlist.contains(&symbol) {
            watchlist.push(symbol);
        }
    }
    Ok(watchlist)
}
