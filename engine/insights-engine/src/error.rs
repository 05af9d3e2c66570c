//! Error types for the insights engine

use crate::models::WeekPair;
use persistence::PersistenceError;
use thiserror::Error;

/// Result type alias for insights operations
pub type Result<T> = std::result::Result<T, InsightsError>;

/// Errors that can occur while computing or generating comparisons
#[derive(Error, Debug)]
pub enum InsightsError {
    /// A requested week's snapshot does not exist
    #[error("No snapshot for season {season} week {week}")]
    MissingSnapshot { season: i32, week: u32 },

    /// `from >= to`, or a week outside `[1, max_week]`
    #[error("Invalid week range {week_from} -> {week_to} (max week {max_week})")]
    InvalidWeekRange { week_from: u32, week_to: u32, max_week: u32 },

    /// Writing an artifact failed after the gateway's retries
    #[error("Failed to write {key}: {source}")]
    PersistenceWrite {
        key: String,
        #[source]
        source: PersistenceError,
    },

    /// Any other persistence failure
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// One entity's record cannot be interpreted
    #[error("Malformed record for {entity_id}: {reason}")]
    MalformedRecord { entity_id: String, reason: String },

    /// Season-level metadata cannot be determined; fatal for a run
    #[error("Season metadata unavailable: {0}")]
    SeasonMetadata(String),

    /// Generation finished but some pairs failed
    #[error("{} comparison pair(s) failed for season {season}", failed.len())]
    PartialBatchFailure { season: i32, failed: Vec<WeekPair> },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl InsightsError {
    /// Create a new malformed record error
    pub fn malformed(entity_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord { entity_id: entity_id.into(), reason: reason.into() }
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error aborts a whole generation run rather than one pair
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SeasonMetadata(_) | Self::Config(_))
    }
}
