//! Application state: every shared singleton, wired once at startup.

use std::sync::Arc;

use crucible_sandbox::manager::SandboxManager;
use crucible_sandbox::pool::SandboxPool;
use crucible_state::archivist::Archivist;
use crucible_state::cold::ColdStore;
use crucible_state::hot::MemoryHotStore;
use crucible_state::object::ObjectStore;
use crucible_state::store::StateStore;

use crate::config::{Config, StorageBackend};
use crate::files::BlobStore;
use crate::orchestrator::Orchestrator;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Arc<Config>,
    /// The sandbox pool.
    pub pool: SandboxPool,
    /// The two-tier state store.
    pub store: Arc<StateStore>,
    /// The blob store for input/output files.
    pub blobs: Arc<BlobStore>,
    /// The execution orchestrator.
    pub orchestrator: Arc<Orchestrator>,
}

fn object_store(backend: &StorageBackend) -> ObjectStore {
    match backend {
        StorageBackend::Memory => ObjectStore::memory(),
        StorageBackend::Fs(root) => ObjectStore::fs(root),
    }
    .expect("failed to build object store backend")
}

impl AppState {
    /// Construct and wire every component from the configuration.
    ///
    /// The pool's replenisher and the archivist are not started here;
    /// `main` launches them so tests can exercise handlers without
    /// background tasks.
    ///
    /// # Panics
    ///
    /// Panics if a storage backend cannot be built; the service refuses
    /// to start without its stores.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let manager = Arc::new(SandboxManager::new(config.sandbox_config()));
        let pool = SandboxPool::new(manager.clone(), config.pool_config());

        let hot = Arc::new(MemoryHotStore::new());
        let cold = ColdStore::new(object_store(&config.state_backend));
        let store = Arc::new(StateStore::new(
            hot,
            cold,
            config.state_store_config(),
        ));
        let blobs = Arc::new(BlobStore::new(object_store(&config.blob_backend)));

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&config),
            pool.clone(),
            manager,
            Arc::clone(&store),
            Arc::clone(&blobs),
        ));

        Self {
            config,
            pool,
            store,
            blobs,
            orchestrator,
        }
    }

    /// Build the archivist over the store's tiers.
    #[must_use]
    pub fn archivist(&self) -> Archivist {
        Archivist::new(
            self.store.hot(),
            self.store.cold(),
            self.config.archivist_config(),
        )
    }
}
