//! Error types for the tick replay engine.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the replay engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (rejected before any I/O).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data error (invalid partition, bad metadata sidecar).
    #[error("Data error: {0}")]
    Data(String),

    /// Strategy construction or registry error.
    #[error("Strategy error: {0}")]
    Strategy(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a data error.
    pub fn data(msg: impl Into<String>) -> Self {
        Error::Data(msg.into())
    }

    /// Create a strategy error.
    pub fn strategy(msg: impl Into<String>) -> Self {
        Error::Strategy(msg.into())
    }

    /// Whether this error was raised by configuration validation.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}
