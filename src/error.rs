//! Error taxonomy for the memory engine.
//!
//! Modeled as a tagged sum rather than an inheritance hierarchy so retry and
//! propagation decisions can switch on the variant instead of inspecting
//! string messages.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngramError>;

#[derive(Error, Debug)]
pub enum EngramError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("ambiguous: {0}")]
    Ambiguous(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("dependency: {0}")]
    Dependency(String),

    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),

    #[error("cancelled")]
    Cancelled,

    #[error("storage: {0}")]
    Storage(String),
}

impl EngramError {
    /// Whether the retry loop in the LLM adapter should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngramError::Transient(_))
    }

    /// Stable discriminant, useful for tests and structured logging.
    pub fn code(&self) -> &'static str {
        match self {
            EngramError::NotFound(_) => "not_found",
            EngramError::Ambiguous(_) => "ambiguous",
            EngramError::Validation(_) => "validation",
            EngramError::Dependency(_) => "dependency",
            EngramError::Transient(_) => "transient",
            EngramError::Permanent(_) => "permanent",
            EngramError::Cancelled => "cancelled",
            EngramError::Storage(_) => "storage",
        }
    }
}

impl From<rusqlite::Error> for EngramError {
    fn from(err: rusqlite::Error) -> Self {
        EngramError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EngramError {
    fn from(err: serde_json::Error) -> Self {
        EngramError::Permanent(format!("json: {err}"))
    }
}

impl From<std::io::Error> for EngramError {
    fn from(err: std::io::Error) -> Self {
        EngramError::Storage(err.to_string())
    }
}
