//! Unified error type for keygate
//!
//! A single error enum shared by every crate in the workspace. Lookup misses are
//! not errors: stores return `Option` for those and reserve `NotFound` for
//! operations that require an existing record (for example resolving an unknown
//! prompt ticket).

use serde::{Deserialize, Serialize};

use crate::effects::StorageError;

/// Unified error type for all keygate operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum KeygateError {
    /// Malformed caller identity, out-of-range event kind, unknown request type
    #[error("Invalid: {message}")]
    Invalid {
        /// Description of the rejected input
        message: String,
    },

    /// A record required by the operation does not exist
    #[error("Not found: {message}")]
    NotFound {
        /// Description of what was not found
        message: String,
    },

    /// The presented authentication does not satisfy the request
    #[error("Permission denied: {message}")]
    PermissionDenied {
        /// Description of the missing authority
        message: String,
    },

    /// Persistence failure; never translated into a default decision
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the I/O failure
        message: String,
    },

    /// A persisted record could not be encoded or decoded
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the codec failure
        message: String,
    },

    /// An atomic compare-and-update lost a race; the caller may retry
    #[error("Race aborted: {message}")]
    RaceAborted {
        /// Description of the contended record
        message: String,
    },

    /// Internal invariant violation
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the violated invariant
        message: String,
    },
}

impl KeygateError {
    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a permission denied error
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a race aborted error
    pub fn race_aborted(message: impl Into<String>) -> Self {
        Self::RaceAborted {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for failures of the persistence layer itself
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Serialization { .. })
    }
}

/// Standard Result type for keygate operations
pub type Result<T> = std::result::Result<T, KeygateError>;

impl From<StorageError> for KeygateError {
    fn from(err: StorageError) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<serde_json::Error> for KeygateError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<std::io::Error> for KeygateError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = KeygateError::invalid("caller id is empty");
        assert!(matches!(err, KeygateError::Invalid { .. }));
        assert_eq!(err.to_string(), "Invalid: caller id is empty");
    }

    #[test]
    fn test_storage_error_conversion() {
        let err = KeygateError::from(StorageError::WriteFailed {
            key: "perm/00".to_string(),
            reason: "disk full".to_string(),
        });
        assert!(err.is_storage());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_io_error_is_storage() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "device gone");
        assert!(KeygateError::from(io_err).is_storage());
    }
}
