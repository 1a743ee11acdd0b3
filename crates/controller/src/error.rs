//! Error types for the controller crate.

use thiserror::Error;

/// Result type alias for controller operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Controller lifecycle errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The cache never completed its initial sync.
    #[error("initial cache sync failed: {reason}")]
    FatalSync { reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] levelwatch_core::Error),

    #[error("controller already stopped")]
    AlreadyStopped,

    #[error("controller task failed: {reason}")]
    TaskJoin { reason: String },
}

impl Error {
    /// Create a fatal sync error.
    pub fn fatal_sync(reason: impl Into<String>) -> Self {
        Self::FatalSync {
            reason: reason.into(),
        }
    }

    /// Create a task join error.
    pub fn task_join(reason: impl Into<String>) -> Self {
        Self::TaskJoin {
            reason: reason.into(),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::task_join(err.to_string())
    }
}
