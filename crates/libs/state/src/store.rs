//! The two-tier state store facade the orchestrator talks to.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cold::ColdStore;
use crate::error::{Result, StateError};
use crate::hot::HotStore;

/// Tuning for the combined store.
#[derive(Debug, Clone)]
pub struct StateStoreConfig {
    /// TTL for hot snapshot entries.
    pub hot_ttl: Duration,
    /// TTL for session metadata documents.
    pub session_meta_ttl: Duration,
    /// Maximum accepted snapshot size; larger saves are rejected with
    /// [`StateError::TooLarge`].
    pub max_snapshot_bytes: usize,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            hot_ttl: Duration::from_secs(7200),
            session_meta_ttl: Duration::from_secs(24 * 3600),
            max_snapshot_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Per-session bookkeeping, stored as a JSON document under
/// `session:{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    /// The session this document describes.
    pub session_id: String,
    /// Language tag of the session's executions.
    pub language: String,
    /// When the session first executed.
    pub created_at: DateTime<Utc>,
    /// When the session last executed.
    pub last_executed_at: DateTime<Utc>,
    /// Number of executions so far.
    pub executions: u64,
}

/// Hot tier plus cold tier, with the load/save policy of the service.
pub struct StateStore {
    hot: Arc<dyn HotStore>,
    cold: ColdStore,
    config: StateStoreConfig,
}

fn state_key(session_id: &str) -> String {
    format!("state:{session_id}")
}

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

impl StateStore {
    /// Prefix of hot-tier snapshot keys, for the archivist's scan.
    pub const STATE_PREFIX: &'static str = "state:";

    /// Assemble the store.
    #[must_use]
    pub fn new(hot: Arc<dyn HotStore>, cold: ColdStore, config: StateStoreConfig) -> Self {
        Self { hot, cold, config }
    }

    /// The hot tier handle, shared with the archivist.
    #[must_use]
    pub fn hot(&self) -> Arc<dyn HotStore> {
        Arc::clone(&self.hot)
    }

    /// The cold tier handle, shared with the archivist.
    #[must_use]
    pub fn cold(&self) -> ColdStore {
        self.cold.clone()
    }

    /// Persist a snapshot for `session_id` in the hot tier.
    ///
    /// # Errors
    ///
    /// [`StateError::TooLarge`] when the snapshot exceeds the configured
    /// bound (the execution itself is not rolled back), or
    /// [`StateError::Unavailable`] when the tier is down.
    pub async fn save_snapshot(&self, session_id: &str, bytes: Bytes) -> Result<()> {
        if bytes.len() > self.config.max_snapshot_bytes {
            return Err(StateError::TooLarge {
                actual: bytes.len(),
                max: self.config.max_snapshot_bytes,
            });
        }
        self.hot
            .save(&state_key(session_id), bytes, self.config.hot_ttl)
            .await
    }

    /// Load the most recent snapshot for `session_id`, preferring hot.
    ///
    /// A hot miss falls through to the cold tier; a cold hit re-populates
    /// the hot tier with a fresh TTL. `None` means the session has no
    /// surviving state anywhere.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Unavailable`] when a tier is down (a miss is
    /// not an error).
    pub async fn load_snapshot(&self, session_id: &str) -> Result<Option<Bytes>> {
        match self.hot.load(&state_key(session_id)).await {
            Ok(bytes) => return Ok(Some(bytes)),
            Err(StateError::NotFound) => {}
            Err(e) => return Err(e),
        }

        match self.cold.restore(session_id).await {
            Ok(bytes) => {
                debug!(%session_id, "Restored session state from the cold tier");
                if let Err(e) = self
                    .hot
                    .save(&state_key(session_id), bytes.clone(), self.config.hot_ttl)
                    .await
                {
                    warn!(%session_id, error = %e, "Failed to re-populate hot tier");
                }
                Ok(Some(bytes))
            }
            Err(StateError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Drop the session's hot-tier snapshot. Cold archives are untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Unavailable`] when the tier is down.
    pub async fn delete_snapshot(&self, session_id: &str) -> Result<()> {
        self.hot.delete(&state_key(session_id)).await
    }

    /// Record one execution in the session's metadata document.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Unavailable`] when the tier is down, or a
    /// serialization error for a corrupt existing document.
    pub async fn record_execution(&self, session_id: &str, language: &str) -> Result<()> {
        let now = Utc::now();
        let meta = match self.session_meta(session_id).await? {
            Some(mut meta) => {
                meta.last_executed_at = now;
                meta.executions += 1;
                meta.language = language.to_string();
                meta
            }
            None => SessionMeta {
                session_id: session_id.to_string(),
                language: language.to_string(),
                created_at: now,
                last_executed_at: now,
                executions: 1,
            },
        };

        let doc = serde_json::to_vec(&meta)?;
        self.hot
            .save(
                &session_key(session_id),
                Bytes::from(doc),
                self.config.session_meta_ttl,
            )
            .await
    }

    /// The session's metadata document, if it is still live.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Unavailable`] when the tier is down, or a
    /// serialization error for a corrupt document.
    pub async fn session_meta(&self, session_id: &str) -> Result<Option<SessionMeta>> {
        match self.hot.load(&session_key(session_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(StateError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Health of (hot, cold) tiers.
    pub async fn health(&self) -> (bool, bool) {
        (self.hot.healthy().await, self.cold.healthy().await)
    }
}

#[cfg(test)]
mod tests {
    use crate::hot::MemoryHotStore;
    use crate::object::ObjectStore;

    use super::*;

    fn store() -> StateStore {
        StateStore::new(
            Arc::new(MemoryHotStore::new()),
            ColdStore::new(ObjectStore::memory().unwrap()),
            StateStoreConfig {
                max_snapshot_bytes: 64,
                ..StateStoreConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn save_then_load_prefers_hot() {
        let store = store();
        store.save_snapshot("s1", Bytes::from_static(b"v1")).await.unwrap();
        assert_eq!(
            store.load_snapshot("s1").await.unwrap(),
            Some(Bytes::from_static(b"v1"))
        );
    }

    #[tokio::test]
    async fn oversized_snapshot_rejected() {
        let store = store();
        let err = store
            .save_snapshot("s1", Bytes::from(vec![0u8; 128]))
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::TooLarge { actual: 128, max: 64 }));

        // Nothing was stored.
        assert_eq!(store.load_snapshot("s1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cold_fallthrough_repopulates_hot() {
        let store = store();
        store
            .cold()
            .archive("s2", Bytes::from_static(b"archived"))
            .await
            .unwrap();

        // Hot miss, cold hit.
        assert_eq!(
            store.load_snapshot("s2").await.unwrap(),
            Some(Bytes::from_static(b"archived"))
        );

        // Now it is back in the hot tier.
        assert_eq!(
            store.hot().load("state:s2").await.unwrap(),
            Bytes::from_static(b"archived")
        );
    }

    #[tokio::test]
    async fn missing_session_loads_none() {
        let store = store();
        assert_eq!(store.load_snapshot("ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn hot_save_overwrites_cold_copy_on_load() {
        let store = store();
        store.cold().archive("s3", Bytes::from_static(b"old")).await.unwrap();
        store.save_snapshot("s3", Bytes::from_static(b"new")).await.unwrap();

        // Hot wins over the stale archive.
        assert_eq!(
            store.load_snapshot("s3").await.unwrap(),
            Some(Bytes::from_static(b"new"))
        );
    }

    #[tokio::test]
    async fn metadata_tracks_executions() {
        let store = store();
        store.record_execution("s4", "py").await.unwrap();
        store.record_execution("s4", "py").await.unwrap();

        let meta = store.session_meta("s4").await.unwrap().unwrap();
        assert_eq!(meta.executions, 2);
        assert_eq!(meta.language, "py");
        assert!(meta.last_executed_at >= meta.created_at);
    }
}
