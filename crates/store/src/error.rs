//! Error types for the store crate.

use thiserror::Error;

use crate::types::ResourceVersion;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Failure to derive an [`ObjectKey`](crate::ObjectKey) from an item's identity fields.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("object has no name (namespace: {namespace:?})")]
    MissingName { namespace: Option<String> },

    #[error("identity segment '{segment}' must not contain '/'")]
    InvalidSegment { segment: String },
}

/// Errors reported by an external store or a watch stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The watch connection dropped. Resumable from the last seen version.
    #[error("watch disconnected: {reason}")]
    Disconnected { reason: String },

    /// The requested resume point is no longer retained. A full relist is required.
    #[error("resource version {requested} is too old to resume from")]
    Expired { requested: ResourceVersion },

    #[error("list failed: {reason}")]
    ListFailed { reason: String },

    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("object '{key}' not found")]
    NotFound { key: String },

    #[error("object '{key}' already exists")]
    AlreadyExists { key: String },

    #[error(transparent)]
    Key(#[from] KeyError),
}

impl StoreError {
    /// Create a disconnected error.
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: reason.into(),
        }
    }

    /// Create an expired error.
    #[must_use]
    pub const fn expired(requested: ResourceVersion) -> Self {
        Self::Expired { requested }
    }

    /// Create a list failed error.
    pub fn list_failed(reason: impl Into<String>) -> Self {
        Self::ListFailed {
            reason: reason.into(),
        }
    }

    /// Create an unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Whether recovering from this error requires a full relist.
    #[must_use]
    pub const fn requires_relist(&self) -> bool {
        matches!(self, Self::Expired { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::disconnected("connection reset");
        assert!(err.to_string().contains("connection reset"));

        let err = StoreError::expired(ResourceVersion::new(42));
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_only_expired_requires_relist() {
        assert!(StoreError::expired(ResourceVersion::ZERO).requires_relist());
        assert!(!StoreError::disconnected("eof").requires_relist());
        assert!(!StoreError::unavailable("down").requires_relist());
    }

    #[test]
    fn test_key_error_converts() {
        let err: StoreError = KeyError::MissingName { namespace: None }.into();
        assert!(matches!(err, StoreError::Key(_)));
    }
}
