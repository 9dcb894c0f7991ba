use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Identifier unknown to the requested source
    #[error("Not found: {0}")]
    NotFound(String),

    /// Too few points left after truncation, resampling or alignment
    #[error("Insufficient data for {identifier}: {points} points, need at least {required}")]
    InsufficientData {
        identifier: String,
        points: usize,
        required: usize,
    },

    /// Persisted cache entry could not be decoded
    #[error("Cache corruption: {0}")]
    CacheCorruption(String),

    /// External source unreachable and no local fallback
    #[error("Source unavailable ({source_name}): {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Errors that only affect a single candidate and are folded into skip counts
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::NotFound(_)
                | AppError::InsufficientData { .. }
                | AppError::SourceUnavailable { .. }
                | AppError::CacheCorruption(_)
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::Io(format!("CSV error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Parse(format!("JSON error: {}", err))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Other(format!("Background task failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

// Alias for convenience
pub type Error = AppError;
