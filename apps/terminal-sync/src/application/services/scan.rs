//! Scan Query Compiler
//!
//! Validates scanner filters into a [`ScanRequest`], runs it through the
//! gateway and publishes the ordered results.

use std::sync::Arc;

use thiserror::Error;

use crate::application::ports::{GatewayError, MarketGateway};
use crate::application::store::{Mutation, Store};
use crate::domain::ValidationError;
use crate::domain::scan::{FilterInput, ScanPreset, ScanRequest, ScanRow, order_results};

/// Scan errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    /// A filter failed validation.
    #[error("filter {index} is invalid: {source}")]
    InvalidFilter {
        /// Position of the filter in the request.
        index: usize,
        /// What was wrong with it.
        source: ValidationError,
    },

    /// The universe identifier was rejected.
    #[error("invalid universe: {0}")]
    InvalidUniverse(ValidationError),

    /// The remote scan failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Compile filter input into a scan request.
///
/// Filters combine with AND and keep their order. `limit` is clamped to
/// `1..=max_limit`.
///
/// # Errors
///
/// `InvalidFilter` naming the first bad filter, or `InvalidUniverse` for a
/// blank universe.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use terminal_sync::application::services::compile_scan;
/// use terminal_sync::domain::scan::FilterInput;
///
/// let filters = vec![
///     FilterInput::new("price", ">", json!(10)),
///     FilterInput::new("volume", ">=", json!("1000000")),
/// ];
/// let request = compile_scan(&filters, "us_equities", 10_000, 500).unwrap();
///
/// assert_eq!(request.filters.len(), 2);
/// assert_eq!(request.limit, 500);
/// ```
pub fn compile_scan(
    filters: &[FilterInput],
    universe: &str,
    limit: usize,
    max_limit: usize,
) -> Result<ScanRequest, ScanError> {
    let filters = filters
        .iter()
        .enumerate()
        .map(|(index, input)| {
            input
                .validate()
                .map_err(|source| ScanError::InvalidFilter { index, source })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let universe = universe.trim();
    if universe.is_empty() {
        return Err(ScanError::InvalidUniverse(ValidationError::EmptyUniverse));
    }

    Ok(ScanRequest {
        filters,
        universe: universe.to_string(),
        limit: limit.clamp(1, max_limit.max(1)),
    })
}

/// Runs scans and fetches presets.
#[derive(Clone)]
pub struct ScanService {
    store: Arc<Store>,
    gateway: Arc<dyn MarketGateway>,
    max_limit: usize,
}

impl std::fmt::Debug for ScanService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanService")
            .field("max_limit", &self.max_limit)
            .finish_non_exhaustive()
    }
}

impl ScanService {
    /// Create a scan service.
    #[must_use]
    pub fn new(store: Arc<Store>, gateway: Arc<dyn MarketGateway>, max_limit: usize) -> Self {
        Self {
            store,
            gateway,
            max_limit,
        }
    }

    /// Compile and run a scan, then store and return the ordered rows.
    ///
    /// A failed remote scan is also recorded in the store; the previous
    /// results stay visible.
    ///
    /// # Errors
    ///
    /// Compilation errors are returned before the gateway is called;
    /// remote failures come back as `Gateway`.
    pub async fn run(
        &self,
        filters: &[FilterInput],
        universe: &str,
        limit: usize,
    ) -> Result<Vec<ScanRow>, ScanError> {
        let request = compile_scan(filters, universe, limit, self.max_limit)?;

        match self.gateway.run_scan(&request).await {
            Ok(mut rows) => {
                order_results(&mut rows);
                tracing::info!(
                    universe = %request.universe,
                    filters = request.filters.len(),
                    rows = rows.len(),
                    "Scan completed"
                );
                self.store.apply(Mutation::ReplaceScan(rows.clone()));
                Ok(rows)
            }
            Err(err) => {
                tracing::warn!(universe = %request.universe, error = %err, "Scan failed");
                self.store.apply(Mutation::ScanError(err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Scan presets offered by the server.
    ///
    /// # Errors
    ///
    /// `Gateway` if the fetch failed.
    pub async fn presets(&self) -> Result<Vec<ScanPreset>, ScanError> {
        Ok(self.gateway.get_scan_presets().await?)
    }

    /// Run a preset's filters.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub async fn run_preset(
        &self,
        preset: &ScanPreset,
        universe: &str,
        limit: usize,
    ) -> Result<Vec<ScanRow>, ScanError> {
        tracing::debug!(preset = %preset.id, "Running scan preset");
        self.run(&preset.filters, universe, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::InMemoryGateway;
    use crate::domain::market::Symbol;
    use crate::domain::scan::ComparisonOp;
    use serde_json::json;
    use std::collections::BTreeMap;
    use test_case::test_case;

    fn row(symbol: &str, rank: Option<f64>, price: f64) -> ScanRow {
        ScanRow {
            symbol: Symbol::new(symbol),
            rank,
            fields: BTreeMap::from([("price".to_string(), price)]),
        }
    }

    fn setup() -> (ScanService, Arc<InMemoryGateway>, Arc<Store>) {
        let store = Arc::new(Store::new());
        let gateway = Arc::new(InMemoryGateway::new());
        let service = ScanService::new(store.clone(), gateway.clone(), 500);
        (service, gateway, store)
    }

    #[test]
    fn compile_keeps_filter_order() {
        let filters = vec![
            FilterInput::new("price", ">", json!(10)),
            FilterInput::new("rsi", "<=", json!(30.5)),
        ];

        let request = compile_scan(&filters, " us_equities ", 50, 500).unwrap();

        assert_eq!(request.universe, "us_equities");
        assert_eq!(request.filters[0].operator, ComparisonOp::Gt);
        assert_eq!(request.filters[1].field, "rsi");
        assert_eq!(request.limit, 50);
    }

    #[test_case(0, 1 ; "zero clamps up")]
    #[test_case(1, 1 ; "lower bound")]
    #[test_case(500, 500 ; "upper bound")]
    #[test_case(501, 500 ; "above max clamps down")]
    fn compile_clamps_limit(limit: usize, expected: usize) {
        let request = compile_scan(&[], "us_equities", limit, 500).unwrap();
        assert_eq!(request.limit, expected);
    }

    #[test]
    fn compile_reports_index_of_bad_filter() {
        let filters = vec![
            FilterInput::new("price", ">", json!(10)),
            FilterInput::new("volume", "~", json!(1)),
        ];

        let err = compile_scan(&filters, "us_equities", 10, 500).unwrap_err();

        assert_eq!(
            err,
            ScanError::InvalidFilter {
                index: 1,
                source: ValidationError::UnknownOperator("~".into()),
            }
        );
    }

    #[test]
    fn compile_rejects_non_numeric_value() {
        let filters = vec![FilterInput::new("price", ">", json!("cheap"))];

        let err = compile_scan(&filters, "us_equities", 10, 500).unwrap_err();

        assert!(matches!(
            err,
            ScanError::InvalidFilter {
                index: 0,
                source: ValidationError::NonNumericValue { .. }
            }
        ));
    }

    #[test]
    fn compile_rejects_blank_universe() {
        let err = compile_scan(&[], "  ", 10, 500).unwrap_err();
        assert_eq!(err, ScanError::InvalidUniverse(ValidationError::EmptyUniverse));
    }

    #[tokio::test]
    async fn run_orders_by_rank_and_stores_rows() {
        let (service, gateway, store) = setup();
        gateway.set_scan_rows(vec![
            row("AAA", None, 20.0),
            row("BBB", Some(1.0), 30.0),
            row("CCC", Some(5.0), 5.0),
            row("DDD", Some(3.0), 40.0),
        ]);

        let rows = service
            .run(&[FilterInput::new("price", ">", json!(10))], "us_equities", 10)
            .await
            .unwrap();

        let symbols: Vec<&str> = rows.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["DDD", "BBB", "AAA"]);
        assert_eq!(store.snapshot().scan.value.as_ref(), Some(&rows));
        assert_eq!(gateway.scan_requests().len(), 1);
    }

    #[tokio::test]
    async fn invalid_filter_never_reaches_gateway() {
        let (service, gateway, store) = setup();

        let err = service
            .run(&[FilterInput::new("", ">", json!(1))], "us_equities", 10)
            .await
            .unwrap_err();

        assert!(matches!(err, ScanError::InvalidFilter { index: 0, .. }));
        assert!(gateway.scan_requests().is_empty());
        assert_eq!(store.snapshot().version, 0);
    }

    #[tokio::test]
    async fn presets_round_trip_through_run() {
        let (service, gateway, _store) = setup();
        gateway.set_presets(vec![ScanPreset {
            id: "momentum".into(),
            name: "Momentum".into(),
            description: None,
            filters: vec![FilterInput::new("price", ">", json!(25))],
        }]);
        gateway.set_scan_rows(vec![row("AAA", None, 20.0), row("BBB", None, 30.0)]);

        let presets = service.presets().await.unwrap();
        let rows = service.run_preset(&presets[0], "us_equities", 10).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, Symbol::new("BBB"));
    }
}
