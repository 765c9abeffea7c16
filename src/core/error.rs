use thiserror::Error;

/// Result type for detection and alignment operations.
pub type CoResult<T> = Result<T, CoError>;

/// Errors reported by the detection pipeline.
///
/// A pipeline that simply finds no width matching the expected event count is
/// not an error; see [`crate::FitOutcome::NoFit`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoError {
    /// A scalar configuration value is missing or out of range.
    #[error("invalid configuration for `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// Width in samples was requested but no device clock frequency is known.
    #[error("device clock frequency is unknown; cannot convert clock cycles to samples")]
    MissingDeviceFrequency,

    /// The trace cannot hold even one event at the smallest candidate width.
    #[error("trace too short: need at least {required} samples, got {available}")]
    InsufficientData { required: usize, available: usize },

    /// An input sequence that must be non-empty was empty.
    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    /// Two sequences that must be parallel have different lengths.
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

impl CoError {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}
