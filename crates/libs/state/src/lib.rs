//! Two-tier session-state persistence for the Crucible service.
//!
//! Interactive-language session snapshots live in a hot tier (short-TTL
//! key-value store) and age out into a cold tier (object store) via a
//! background archivist. The snapshot bytes are opaque to every type in
//! this crate.

pub mod archivist;
pub mod cold;
pub mod error;
pub mod hot;
pub mod object;
pub mod store;

pub use archivist::{Archivist, ArchivistConfig};
pub use cold::ColdStore;
pub use error::{Result, StateError};
pub use hot::{HotStore, MemoryHotStore};
pub use object::ObjectStore;
pub use store::{SessionMeta, StateStore, StateStoreConfig};
