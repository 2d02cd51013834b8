//! The cold tier: archived session snapshots in the object store.
//!
//! Archive objects live under `state-archive/{sessionId}`. Their TTL is an
//! object-store lifecycle rule, configured on the bucket rather than
//! enforced here; archival preserves the snapshot bytes exactly.

use bytes::Bytes;

use crate::error::Result;
use crate::object::ObjectStore;

const ARCHIVE_PREFIX: &str = "state-archive";

/// Long-TTL snapshot storage.
#[derive(Debug, Clone)]
pub struct ColdStore {
    objects: ObjectStore,
}

impl ColdStore {
    /// A cold tier over the given object store.
    #[must_use]
    pub fn new(objects: ObjectStore) -> Self {
        Self { objects }
    }

    fn key(session_id: &str) -> String {
        format!("{ARCHIVE_PREFIX}/{session_id}")
    }

    /// Store a snapshot under the archive-namespaced key.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StateError::Unavailable`] on backend failure.
    pub async fn archive(&self, session_id: &str, bytes: Bytes) -> Result<()> {
        self.objects.put(&Self::key(session_id), bytes).await
    }

    /// Fetch an archived snapshot.
    ///
    /// # Errors
    ///
    /// [`crate::StateError::NotFound`] when the session was never archived
    /// or its object aged out.
    pub async fn restore(&self, session_id: &str) -> Result<Bytes> {
        self.objects.get(&Self::key(session_id)).await
    }

    /// Whether the backing object store answers requests.
    pub async fn healthy(&self) -> bool {
        self.objects.healthy().await
    }
}

#[cfg(test)]
mod tests {
    use crate::error::StateError;

    use super::*;

    #[tokio::test]
    async fn archive_preserves_bytes_exactly() {
        let cold = ColdStore::new(ObjectStore::memory().unwrap());
        let payload = Bytes::from(vec![0u8, 1, 2, 255, 254]);
        cold.archive("s1", payload.clone()).await.unwrap();
        assert_eq!(cold.restore("s1").await.unwrap(), payload);
    }

    #[tokio::test]
    async fn unarchived_session_is_not_found() {
        let cold = ColdStore::new(ObjectStore::memory().unwrap());
        assert!(matches!(cold.restore("nope").await, Err(StateError::NotFound)));
    }
}
