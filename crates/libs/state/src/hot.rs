//! The hot tier: a TTL key-value store for live session state.
//!
//! The trait is the seam: the in-memory implementation below satisfies
//! every invariant the orchestrator and archivist rely on (TTL visibility,
//! last-access refresh on load, idle enumeration), and a server-backed
//! implementation can replace it without touching either.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use crate::error::{Result, StateError};

/// A TTL key-value store holding snapshot bytes.
#[async_trait]
pub trait HotStore: Send + Sync {
    /// Write `bytes` under `key` with a time-to-live. Idempotent; a
    /// racing save simply overwrites.
    async fn save(&self, key: &str, bytes: Bytes, ttl: Duration) -> Result<()>;

    /// Read the bytes under `key`, refreshing the last-access timestamp
    /// the archivist uses to judge idleness.
    ///
    /// # Errors
    ///
    /// [`StateError::NotFound`] for absent or expired keys.
    async fn load(&self, key: &str) -> Result<Bytes>;

    /// Remove `key` from the hot tier. Removing an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Entries under `prefix` whose last access is older than `idle_for`,
    /// with their bytes. Does not refresh last-access; this is the
    /// archivist's read.
    async fn idle_entries(&self, prefix: &str, idle_for: Duration) -> Result<Vec<(String, Bytes)>>;

    /// Whether the store currently answers requests.
    async fn healthy(&self) -> bool;
}

#[derive(Debug)]
struct Entry {
    bytes: Bytes,
    expires_at: Instant,
    last_access: Instant,
}

/// In-process hot tier.
#[derive(Debug, Default)]
pub struct MemoryHotStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryHotStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().expect("hot store lock poisoned")
    }
}

#[async_trait]
impl HotStore for MemoryHotStore {
    async fn save(&self, key: &str, bytes: Bytes, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        self.lock().insert(
            key.to_string(),
            Entry {
                bytes,
                expires_at: now + ttl,
                last_access: now,
            },
        );
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Bytes> {
        let mut entries = self.lock();
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_access = now;
                Ok(entry.bytes.clone())
            }
            Some(_) => {
                entries.remove(key);
                Err(StateError::NotFound)
            }
            None => Err(StateError::NotFound),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    async fn idle_entries(&self, prefix: &str, idle_for: Duration) -> Result<Vec<(String, Bytes)>> {
        let mut entries = self.lock();
        let now = Instant::now();

        // Opportunistic purge of expired entries while we scan anyway.
        entries.retain(|_, entry| entry.expires_at > now);

        Ok(entries
            .iter()
            .filter(|(key, entry)| {
                key.starts_with(prefix) && now.duration_since(entry.last_access) >= idle_for
            })
            .map(|(key, entry)| (key.clone(), entry.bytes.clone()))
            .collect())
    }

    async fn healthy(&self) -> bool {
        true
    }
}
