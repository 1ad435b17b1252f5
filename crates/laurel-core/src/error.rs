//! Error types for laurel domain types.

use crate::ids::IdError;
use crate::RewardError;

/// Result type for laurel domain operations.
pub type Result<T> = std::result::Result<T, LaurelError>;

/// Errors raised by domain validation and parsing.
#[derive(Debug, thiserror::Error)]
pub enum LaurelError {
    /// A badge definition cannot be tracked.
    #[error("invalid badge definition: {0}")]
    InvalidBadge(String),

    /// A reward descriptor could not be parsed.
    #[error("reward error: {0}")]
    Reward(#[from] RewardError),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Unknown leaderboard metric name.
    #[error("unknown leaderboard metric: {0}")]
    UnknownMetric(String),
}
