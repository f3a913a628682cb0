use thiserror::Error;

use crate::persistence::StoreError;

/// Validation and contract errors exposed by `leadgate-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("timestamp is outside the representable range: '{value}'")]
    TimestampOutOfRange { value: String },
    #[error("timestamp cannot be rendered in the upstream date format: '{value}'")]
    UpstreamFormat { value: String },

    #[error("setting '{name}' has invalid value '{value}'")]
    InvalidSetting { name: &'static str, value: String },
    #[error("setting '{name}' is required")]
    MissingSetting { name: &'static str },

    #[error("invalid cache pattern '{pattern}'")]
    InvalidCachePattern { pattern: String },
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
