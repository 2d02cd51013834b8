//! A thin object-store wrapper shared by the cold tier and the blob store.

use std::path::Path;

use bytes::Bytes;
use opendal::services;
use opendal::{ErrorKind, Operator};
use tracing::warn;

use crate::error::{Result, StateError};

/// Key-addressed byte storage over an opendal operator.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    operator: Operator,
}

impl ObjectStore {
    /// A store over an existing operator.
    #[must_use]
    pub fn new(operator: Operator) -> Self {
        Self { operator }
    }

    /// An in-memory store, for tests and single-node setups.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Unavailable`] if the backend cannot be built.
    pub fn memory() -> Result<Self> {
        let operator = Operator::new(services::Memory::default())
            .map_err(|e| StateError::Unavailable(e.to_string()))?
            .finish();
        Ok(Self::new(operator))
    }

    /// A filesystem-backed store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Unavailable`] if the backend cannot be built.
    pub fn fs(root: &Path) -> Result<Self> {
        let builder = services::Fs::default().root(&root.to_string_lossy());
        let operator = Operator::new(builder)
            .map_err(|e| StateError::Unavailable(e.to_string()))?
            .finish();
        Ok(Self::new(operator))
    }

    /// Store `bytes` under `key`, overwriting any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Unavailable`] on backend failure.
    pub async fn put(&self, key: &str, bytes: Bytes) -> Result<()> {
        self.operator
            .write(key, bytes)
            .await
            .map_err(|e| StateError::Unavailable(e.to_string()))?;
        Ok(())
    }

    /// Fetch the bytes under `key`.
    ///
    /// # Errors
    ///
    /// [`StateError::NotFound`] for absent keys, otherwise
    /// [`StateError::Unavailable`].
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        match self.operator.read(key).await {
            Ok(buffer) => Ok(buffer.to_bytes()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StateError::NotFound),
            Err(e) => Err(StateError::Unavailable(e.to_string())),
        }
    }

    /// Remove `key`. Removing an absent key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Unavailable`] on backend failure.
    pub async fn delete(&self, key: &str) -> Result<()> {
        match self.operator.delete(key).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::Unavailable(e.to_string())),
        }
    }

    /// Whether the backend currently answers requests.
    pub async fn healthy(&self) -> bool {
        match self.operator.check().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Object store health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_round_trip() {
        let store = ObjectStore::memory().unwrap();
        store.put("a/b", Bytes::from_static(b"payload")).await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap(), Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let store = ObjectStore::memory().unwrap();
        assert!(matches!(store.get("absent").await, Err(StateError::NotFound)));
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let store = ObjectStore::memory().unwrap();
        store.put("k", Bytes::from_static(b"v")).await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(matches!(store.get("k").await, Err(StateError::NotFound)));
    }

    #[tokio::test]
    async fn fs_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::fs(dir.path()).unwrap();
        store.put("nested/key", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(store.get("nested/key").await.unwrap(), Bytes::from_static(b"v"));
    }
}
