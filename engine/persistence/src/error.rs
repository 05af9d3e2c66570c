//! Error types for the persistence layer

use thiserror::Error;

/// Result type alias for persistence operations
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Errors that can occur in the persistence layer
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// I/O errors (file operations, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Conditional write lost against a concurrent writer
    #[error("Version conflict on {key}: expected {expected:?}, found {found:?}")]
    Conflict { key: String, expected: Option<u64>, found: Option<u64> },

    /// Key rejected by the backend (empty, absolute, or escaping the data dir)
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Bounded retries ran out
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// Generic error with context
    #[error("Persistence error: {0}")]
    Generic(String),
}

impl PersistenceError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new invalid key error
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }

    /// Create a new generic error
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Whether retrying the same call can succeed.
    ///
    /// Conflicts and bad keys are deterministic; the caller has to change
    /// something before trying again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Generic(_))
    }
}
