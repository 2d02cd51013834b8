//! The archivist: ages idle hot entries into the cold tier.
//!
//! Runs on a fixed interval. The move is write-then-delete — a crash
//! between the two leaves a harmless duplicate, because the load path
//! prefers hot and a racing save simply overwrites.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::cold::ColdStore;
use crate::hot::HotStore;
use crate::store::StateStore;

/// Archivist tuning.
#[derive(Debug, Clone)]
pub struct ArchivistConfig {
    /// How often the scan runs.
    pub scan_interval: Duration,
    /// Hot entries idle past this move to the cold tier.
    pub archive_after: Duration,
}

impl Default for ArchivistConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(60),
            archive_after: Duration::from_secs(30 * 60),
        }
    }
}

/// Moves idle session snapshots from hot to cold.
pub struct Archivist {
    hot: Arc<dyn HotStore>,
    cold: ColdStore,
    config: ArchivistConfig,
}

impl Archivist {
    /// Build an archivist over the store's tiers.
    #[must_use]
    pub fn new(hot: Arc<dyn HotStore>, cold: ColdStore, config: ArchivistConfig) -> Self {
        Self { hot, cold, config }
    }

    /// Run one scan; returns how many sessions were archived.
    ///
    /// Failures are logged per session and never abort the scan: an entry
    /// that could not be archived stays hot and is retried next interval.
    pub async fn scan_once(&self) -> usize {
        let idle = match self
            .hot
            .idle_entries(StateStore::STATE_PREFIX, self.config.archive_after)
            .await
        {
            Ok(idle) => idle,
            Err(e) => {
                error!(error = %e, "Archivist could not enumerate idle sessions");
                return 0;
            }
        };

        let mut archived = 0;
        for (key, bytes) in idle {
            let Some(session_id) = key.strip_prefix(StateStore::STATE_PREFIX) else {
                continue;
            };

            // Write first; only a successful archive may delete the hot copy.
            if let Err(e) = self.cold.archive(session_id, bytes).await {
                warn!(%session_id, error = %e, "Archive write failed, keeping hot entry");
                continue;
            }
            if let Err(e) = self.hot.delete(&key).await {
                warn!(%session_id, error = %e, "Hot delete after archive failed");
                continue;
            }

            debug!(%session_id, "Session state archived");
            archived += 1;
        }
        archived
    }

    /// Spawn the background loop. It stops when `shutdown` is notified.
    pub fn start(self: Arc<Self>, shutdown: Arc<Notify>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.scan_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let archived = self.scan_once().await;
                        if archived > 0 {
                            info!(archived, "Archivist scan complete");
                        }
                    }
                    () = shutdown.notified() => {
                        info!("Archivist shutting down");
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::error::StateError;
    use crate::hot::MemoryHotStore;
    use crate::object::ObjectStore;
    use crate::store::{StateStoreConfig, StateStore};

    use super::*;

    fn fixture() -> (Arc<MemoryHotStore>, ColdStore, StateStore) {
        let hot = Arc::new(MemoryHotStore::new());
        let cold = ColdStore::new(ObjectStore::memory().unwrap());
        let store = StateStore::new(hot.clone(), cold.clone(), StateStoreConfig::default());
        (hot, cold, store)
    }

    #[tokio::test]
    async fn idle_session_moves_to_cold_and_survives() {
        tokio::time::pause();
        let (hot, cold, store) = fixture();
        let archivist = Archivist::new(
            hot.clone(),
            cold.clone(),
            ArchivistConfig {
                scan_interval: Duration::from_secs(60),
                archive_after: Duration::from_secs(100),
            },
        );

        store.save_snapshot("s1", Bytes::from_static(b"bytes")).await.unwrap();
        tokio::time::advance(Duration::from_secs(101)).await;

        assert_eq!(archivist.scan_once().await, 1);

        // Hot entry is gone, the archive holds the exact bytes...
        assert!(matches!(hot.load("state:s1").await, Err(StateError::NotFound)));
        assert_eq!(cold.restore("s1").await.unwrap(), Bytes::from_static(b"bytes"));

        // ...and a load through the store still returns them (archival law).
        assert_eq!(
            store.load_snapshot("s1").await.unwrap(),
            Some(Bytes::from_static(b"bytes"))
        );
    }

    #[tokio::test]
    async fn fresh_sessions_stay_hot() {
        tokio::time::pause();
        let (hot, cold, store) = fixture();
        let archivist = Archivist::new(
            hot.clone(),
            cold,
            ArchivistConfig {
                scan_interval: Duration::from_secs(60),
                archive_after: Duration::from_secs(100),
            },
        );

        store.save_snapshot("s1", Bytes::from_static(b"bytes")).await.unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;

        assert_eq!(archivist.scan_once().await, 0);
        assert!(hot.load("state:s1").await.is_ok());
    }

    #[tokio::test]
    async fn metadata_documents_are_not_archived() {
        tokio::time::pause();
        let (hot, cold, store) = fixture();
        let archivist = Archivist::new(
            hot.clone(),
            cold.clone(),
            ArchivistConfig {
                scan_interval: Duration::from_secs(60),
                archive_after: Duration::from_secs(100),
            },
        );

        store.record_execution("s1", "py").await.unwrap();
        tokio::time::advance(Duration::from_secs(200)).await;

        assert_eq!(archivist.scan_once().await, 0);
        // The metadata document is untouched.
        assert!(store.session_meta("s1").await.unwrap().is_some());
    }
}
