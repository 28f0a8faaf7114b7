use super::types::{GroupKey, Mechanism};

/// Minimum number of monthly records a lookback window must hold.
pub const MIN_HISTORY_MONTHS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error(
        "insufficient history: {found} monthly records in window, at least {required} required; \
         try a wider lookback window or another group"
    )]
    InsufficientHistory { found: usize, required: usize },

    #[error(
        "insufficient sample: no month with allocations for {mechanism}; \
         try a wider lookback window or another group"
    )]
    InsufficientSample { mechanism: Mechanism },

    #[error("invalid parameter {field}: {reason}")]
    InvalidParameter { field: &'static str, reason: String },

    #[error("invalid record at position {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },

    #[error(transparent)]
    Source(#[from] RecordSourceError),
}

impl ForecastError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ForecastError::InvalidParameter {
            field,
            reason: reason.into(),
        }
    }
}

/// Failures of the external record collaborator.
#[derive(Debug, thiserror::Error)]
pub enum RecordSourceError {
    #[error("unknown group {0}")]
    UnknownGroup(GroupKey),

    #[error("failed to read history: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse history: {0}")]
    Parse(#[from] serde_json::Error),
}
