//! In-memory storage handler

use async_trait::async_trait;
use keygate_core::effects::{StorageEffects, StorageError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory storage handler for tests and ephemeral deployments
#[derive(Debug, Clone, Default)]
pub struct MemoryStorageHandler {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorageHandler {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether the store holds no keys
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl StorageEffects for MemoryStorageHandler {
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        data.insert(key.to_string(), value);
        Ok(())
    }

    async fn store_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, StorageError> {
        let mut data = self.data.write().await;
        if data.contains_key(key) {
            return Ok(false);
        }
        data.insert(key.to_string(), value);
        Ok(true)
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let mut data = self.data.write().await;
        Ok(data.remove(key).is_some())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let data = self.data.read().await;
        Ok(data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let data = self.data.read().await;
        Ok(data.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_replaces_existing_value() {
        let storage = MemoryStorageHandler::new();
        storage.store("perm/a", b"one".to_vec()).await.unwrap();
        storage.store("perm/a", b"two".to_vec()).await.unwrap();
        assert_eq!(storage.len().await, 1);
        assert_eq!(
            storage.retrieve("perm/a").await.unwrap(),
            Some(b"two".to_vec())
        );
    }

    #[tokio::test]
    async fn store_if_absent_never_overwrites() {
        let storage = MemoryStorageHandler::new();
        assert!(storage.store_if_absent("audit/1", b"a".to_vec()).await.unwrap());
        assert!(!storage.store_if_absent("audit/1", b"b".to_vec()).await.unwrap());
        assert_eq!(storage.retrieve("audit/1").await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn list_keys_filters_by_prefix() {
        let storage = MemoryStorageHandler::new();
        storage.store("perm/a", vec![]).await.unwrap();
        storage.store("perm/b", vec![]).await.unwrap();
        storage.store("app/a", vec![]).await.unwrap();
        let mut keys = storage.list_keys("perm/").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["perm/a".to_string(), "perm/b".to_string()]);
        assert!(storage.remove("app/a").await.unwrap());
        assert!(!storage.exists("app/a").await.unwrap());
    }
}
