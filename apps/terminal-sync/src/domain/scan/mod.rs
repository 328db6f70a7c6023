//! Scanner Types
//!
//! Filters, requests, result rows and presets for the market scanner.
//! Filters arrive as loosely typed [`FilterInput`] (from a form or a
//! preset) and are validated into [`ScanFilter`] before anything is sent.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::ValidationError;
use super::market::Symbol;

/// Default upper bound for a scan's result limit.
pub const DEFAULT_MAX_LIMIT: usize = 500;

// =============================================================================
// Operators
// =============================================================================

/// Comparison applied between a field and its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    /// `>`
    #[serde(rename = ">")]
    Gt,
    /// `<`
    #[serde(rename = "<")]
    Lt,
    /// `>=`
    #[serde(rename = ">=")]
    Gte,
    /// `<=`
    #[serde(rename = "<=")]
    Lte,
    /// `==`
    #[serde(rename = "==")]
    Eq,
}

impl ComparisonOp {
    /// Operator symbol.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Eq => "==",
        }
    }

    /// Evaluate `lhs <op> rhs`.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn evaluate(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Gt => lhs > rhs,
            Self::Lt => lhs < rhs,
            Self::Gte => lhs >= rhs,
            Self::Lte => lhs <= rhs,
            Self::Eq => lhs == rhs,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComparisonOp {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" | "gt" => Ok(Self::Gt),
            "<" | "lt" => Ok(Self::Lt),
            ">=" | "gte" => Ok(Self::Gte),
            "<=" | "lte" => Ok(Self::Lte),
            "==" | "=" | "eq" => Ok(Self::Eq),
            other => Err(ValidationError::UnknownOperator(other.to_string())),
        }
    }
}

// =============================================================================
// Filters
// =============================================================================

/// Unvalidated filter criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterInput {
    /// Field name, e.g. `change_percent`.
    pub field: String,
    /// Operator as typed.
    pub operator: String,
    /// Threshold as typed: a JSON number or a numeric string.
    pub value: serde_json::Value,
}

impl FilterInput {
    /// Convenience constructor.
    #[must_use]
    pub fn new(
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }

    /// Validate into a [`ScanFilter`].
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for an empty field, an unrecognized
    /// operator or a non-numeric (or non-finite) value.
    pub fn validate(&self) -> Result<ScanFilter, ValidationError> {
        let field = self.field.trim();
        if field.is_empty() {
            return Err(ValidationError::EmptyField);
        }

        let op = self.operator.parse::<ComparisonOp>()?;

        let value = match &self.value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|v| v.is_finite())
        .ok_or_else(|| ValidationError::NonNumericValue {
            field: field.to_string(),
            value: self.value.to_string(),
        })?;

        Ok(ScanFilter {
            field: field.to_string(),
            operator: op,
            value,
        })
    }
}

/// A validated filter. Filters in a request combine with AND.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanFilter {
    /// Field name.
    pub field: String,
    /// Comparison.
    pub operator: ComparisonOp,
    /// Numeric threshold.
    pub value: f64,
}

impl ScanFilter {
    /// Whether a row satisfies this filter. Rows missing the field do not.
    #[must_use]
    pub fn matches(&self, row: &ScanRow) -> bool {
        row.fields
            .get(&self.field)
            .is_some_and(|v| self.operator.evaluate(*v, self.value))
    }
}

// =============================================================================
// Requests and results
// =============================================================================

/// A compiled scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Filters, ANDed in order.
    pub filters: Vec<ScanFilter>,
    /// Universe identifier, e.g. `us_equities`.
    pub universe: String,
    /// Maximum rows to return.
    pub limit: usize,
}

/// One scan result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRow {
    /// Symbol.
    pub symbol: Symbol,
    /// Ranking value, when the source provides one.
    #[serde(default)]
    pub rank: Option<f64>,
    /// Free-form numeric fields.
    #[serde(default)]
    pub fields: BTreeMap<String, f64>,
}

/// A named, server-supplied filter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanPreset {
    /// Preset id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Filter criteria, validated when the preset is run.
    #[serde(default)]
    pub filters: Vec<FilterInput>,
}

/// Order rows by rank, highest first, rows without a rank last.
///
/// The sort is stable: rows that compare equal (including when no row has
/// a rank) keep their input order.
pub fn order_results(rows: &mut [ScanRow]) {
    rows.sort_by(|a, b| match (a.rank, b.rank) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}
