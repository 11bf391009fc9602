use chrono::{DateTime, Utc};
use thiserror::Error;

/// Rejections raised while building a configuration, before any step runs
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("intensity weights must sum to 1.0, got {sum:.6}")]
    WeightsDoNotSumToOne { sum: f64 },

    #[error("{field} = {value} is out of range (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("{lower_field} ({lower}) must be below {upper_field} ({upper})")]
    Inverted {
        lower_field: &'static str,
        lower: f64,
        upper_field: &'static str,
        upper: f64,
    },

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Faults surfaced by the strategy engine while stepping a sequence
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("record at {received} does not follow previous record at {previous}")]
    OutOfOrder {
        previous: DateTime<Utc>,
        received: DateTime<Utc>,
    },
}
