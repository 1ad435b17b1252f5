//! Engine error types.

use laurel_store::StoreError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine.
///
/// Awards that already exist and rewards that cannot be applied are outcomes,
/// not errors; see [`crate::AwardOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A badge, streak or other record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input from the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The storage layer failed.
    #[error("store error: {0}")]
    Store(StoreError),

    /// A store call did not finish within the configured timeout.
    #[error("store call timed out: {operation}")]
    Timeout {
        /// Name of the store call.
        operation: &'static str,
    },

    /// The blocking task running a store call panicked or was cancelled.
    #[error("store task failed: {0}")]
    Join(String),
}

impl EngineError {
    /// Whether the same call may succeed if retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_transient(),
            Self::Timeout { .. } | Self::Join(_) => true,
            Self::NotFound(_) | Self::InvalidInput(_) => false,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} {id}")),
            other => Self::Store(other),
        }
    }
}
