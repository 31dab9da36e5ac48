//! Error types for the weather extremes service

/// Errors that can occur while tracking, exchanging or persisting extremes
#[derive(Debug, thiserror::Error)]
pub enum ExtremesError {
    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for ExtremesError {
    fn from(err: serde_json::Error) -> Self {
        ExtremesError::Parse(err.to_string())
    }
}

/// Result type alias for weather extremes operations
pub type Result<T> = std::result::Result<T, ExtremesError>;
