//! Key/value storage effect definitions.
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementation**: `keygate-effects` (memory and filesystem handlers)
//! - **Usage**: permission store, app settings, audit log
//!
//! Logical tables are key prefixes. A record's identity is its key, so writing
//! the same key twice replaces the previous value: uniqueness is a property of
//! the storage layer, not of the code calling it. Append-only tables use
//! `store_if_absent`, which never overwrites.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Storage operation error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to read {key}: {reason}")]
    ReadFailed { key: String, reason: String },
    #[error("Failed to write {key}: {reason}")]
    WriteFailed { key: String, reason: String },
    #[error("Failed to delete {key}: {reason}")]
    DeleteFailed { key: String, reason: String },
    #[error("Failed to list keys under {prefix}: {reason}")]
    ListFailed { prefix: String, reason: String },
    #[error("Storage misconfigured: {reason}")]
    ConfigurationError { reason: String },
}

/// Persistent key/value store.
#[async_trait]
pub trait StorageEffects: Send + Sync {
    /// Insert or replace the value under `key`.
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Insert the value only if `key` is vacant. Returns `false` when the key
    /// already existed and nothing was written.
    async fn store_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, StorageError>;

    /// Read the value under `key`.
    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Delete `key`. Returns whether a value was present.
    async fn remove(&self, key: &str) -> Result<bool, StorageError>;

    /// Every key starting with `prefix`, in no particular order.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Whether `key` currently holds a value.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.retrieve(key).await?.is_some())
    }
}

/// Blanket implementation for Arc<T> where T: StorageEffects
#[async_trait]
impl<T: StorageEffects + ?Sized> StorageEffects for std::sync::Arc<T> {
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        (**self).store(key, value).await
    }

    async fn store_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, StorageError> {
        (**self).store_if_absent(key, value).await
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).retrieve(key).await
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        (**self).remove(key).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        (**self).list_keys(prefix).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        (**self).exists(key).await
    }
}
