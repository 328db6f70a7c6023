//! Validation errors raised before any remote call is made.

/// Input rejected synchronously by the core.
///
/// These never reach the gateway: an order ticket, scan filter or symbol
/// that fails validation is returned to the caller as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Symbol was empty or contained whitespace.
    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),

    /// Timeframe string is not one of the supported chart timeframes.
    #[error("unsupported timeframe: {0}")]
    UnsupportedTimeframe(String),

    /// Order quantity must be strictly positive.
    #[error("order quantity must be greater than zero, got {0}")]
    NonPositiveQuantity(String),

    /// A non-market order was submitted without a limit price.
    #[error("{order_type} orders require a limit price")]
    MissingLimitPrice {
        /// The order type that needed a price.
        order_type: String,
    },

    /// Limit price must be strictly positive.
    #[error("limit price must be greater than zero, got {0}")]
    NonPositivePrice(String),

    /// Scan filter has an empty field name.
    #[error("filter field must not be empty")]
    EmptyField,

    /// Scan filter operator is not recognized.
    #[error("unrecognized comparison operator: {0:?}")]
    UnknownOperator(String),

    /// Scan filter value is not numeric.
    #[error("filter value for {field} is not numeric: {value}")]
    NonNumericValue {
        /// Field the value belonged to.
        field: String,
        /// The offending value, rendered as text.
        value: String,
    },

    /// Scan universe identifier is empty.
    #[error("scan universe must not be empty")]
    EmptyUniverse,
}
