//! Fault-injecting storage wrapper
//!
//! Wraps any `StorageEffects` implementation and fails reads or writes on
//! demand, so tests can prove that storage failures surface as errors and
//! never as a default decision.

use async_trait::async_trait;
use keygate_core::effects::{StorageEffects, StorageError};
use keygate_effects::MemoryStorageHandler;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Storage that can be told to fail
#[derive(Debug, Clone)]
pub struct FaultyStorage<S = MemoryStorageHandler> {
    inner: S,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    fail_appends: Arc<AtomicBool>,
}

impl FaultyStorage<MemoryStorageHandler> {
    /// Wrap a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(MemoryStorageHandler::new())
    }
}

impl<S> FaultyStorage<S> {
    /// Wrap `inner`; no faults are active initially.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_reads: Arc::new(AtomicBool::new(false)),
            fail_writes: Arc::new(AtomicBool::new(false)),
            fail_appends: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Toggle read failures (`retrieve`, `list_keys`, `exists`).
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Toggle write failures (`store`, `store_if_absent`, `remove`).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Toggle failures of `store_if_absent` alone, leaving plain stores
    /// working. The audit log appends this way.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check_read(&self, key: &str) -> Result<(), StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::ReadFailed {
                key: key.to_string(),
                reason: "injected read failure".to_string(),
            });
        }
        Ok(())
    }

    fn check_write(&self, key: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed {
                key: key.to_string(),
                reason: "injected write failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<S: StorageEffects> StorageEffects for FaultyStorage<S> {
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.check_write(key)?;
        self.inner.store(key, value).await
    }

    async fn store_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, StorageError> {
        self.check_write(key)?;
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed {
                key: key.to_string(),
                reason: "injected append failure".to_string(),
            });
        }
        self.inner.store_if_absent(key, value).await
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.check_read(key)?;
        self.inner.retrieve(key).await
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        self.check_write(key)?;
        self.inner.remove(key).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::ListFailed {
                prefix: prefix.to_string(),
                reason: "injected read failure".to_string(),
            });
        }
        self.inner.list_keys(prefix).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.check_read(key)?;
        self.inner.exists(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn faults_toggle() {
        let storage = FaultyStorage::in_memory();
        storage.store("k", vec![1]).await.unwrap();

        storage.fail_reads(true);
        assert!(storage.retrieve("k").await.is_err());
        assert!(storage.list_keys("").await.is_err());

        storage.fail_reads(false);
        storage.fail_writes(true);
        assert!(storage.store("k", vec![2]).await.is_err());
        assert_eq!(storage.retrieve("k").await.unwrap(), Some(vec![1]));

        storage.fail_writes(false);
        storage.fail_appends(true);
        assert!(storage.store_if_absent("n", vec![3]).await.is_err());
        storage.store("k", vec![4]).await.unwrap();
        assert_eq!(storage.retrieve("k").await.unwrap(), Some(vec![4]));
    }
}
