use thiserror::Error;
use tickvault_warehouse::WarehouseError;

/// Input and domain validation errors exposed by `tickvault-core`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter: '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("invalid granularity '{value}', expected one of 1m, 5m, 1h, 1d")]
    InvalidResolution { value: String },
    #[error("invalid date '{value}', expected YYYY-MM-DD")]
    InvalidDate { value: String },
    #[error("invalid date range: from {from} is after to {to}")]
    InvalidDateRange { from: String, to: String },
    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("timestamp {value} is not minute aligned")]
    TimestampNotMinuteAligned { value: String },
    #[error("invalid option right '{value}', expected CALL or PUT")]
    InvalidRight { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be positive")]
    NonPositiveValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },

    #[error("bar prices violate low <= min(open, close) <= max(open, close) <= high")]
    InvalidBarBounds,
    #[error("bid {bid} is above ask {ask}")]
    BidAboveAsk { bid: f64, ask: f64 },
    #[error("delta {value} outside [-1, 1]")]
    DeltaOutOfRange { value: f64 },
    #[error("timestamps must be strictly increasing (row {index})")]
    NonMonotonicTimestamps { index: usize },
    #[error("duplicate contract key at row {index}")]
    DuplicateContract { index: usize },

    #[error("error code cannot be empty")]
    EmptyErrorCode,
    #[error("error message cannot be empty")]
    EmptyErrorMessage,
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("partition '{partition}' is corrupt: {reason}")]
    PartitionCorruption { partition: String, reason: String },

    #[error("deadline of {timeout_ms}ms exceeded")]
    DeadlineExceeded { timeout_ms: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Lift storage corruption and deadline errors into their own variants.
    pub fn from_warehouse(error: WarehouseError, timeout_ms: u64) -> Self {
        match error {
            WarehouseError::PartitionCorruption { partition, reason } => {
                Self::PartitionCorruption { partition, reason }
            }
            WarehouseError::DeadlineExceeded => Self::DeadlineExceeded { timeout_ms },
            other => Self::Warehouse(other),
        }
    }
}
