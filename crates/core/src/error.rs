use thiserror::Error;

/// Rejected check or channel configuration.
///
/// Raised at write time only. A check that fails validation is left exactly
/// as it was before the update was attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("invalid cron schedule '{schedule}': {reason}")]
    Schedule { schedule: String, reason: String },

    #[error("unknown time zone: {0}")]
    TimeZone(String),

    #[error("{field} must be between {min}s and {max}s, got {value}s")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("unknown {kind}: '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("{0}")]
    Other(String),
}
