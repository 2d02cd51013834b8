//! The blob store: uploaded input files and produced output files.
//!
//! References take the form `{sessionId}/{fileId}`; the executor consumes
//! and produces them, and `/upload` + `/download` move the bytes in and
//! out. Blobs live in the shared object-store wrapper under a `files/`
//! namespace, so a filesystem or bucket backend can hold both blobs and
//! cold-tier archives.

use bytes::Bytes;
use uuid::Uuid;

use crucible_state::error::{Result, StateError};
use crucible_state::object::ObjectStore;

const BLOB_PREFIX: &str = "files";

/// A stored blob's address and shape.
#[derive(Debug, Clone)]
pub struct BlobRef {
    /// `{sessionId}/{fileId}` reference handed back to clients.
    pub reference: String,
    /// Size in bytes at store time.
    pub size: u64,
}

/// Key-addressed file transport for executions.
#[derive(Debug, Clone)]
pub struct BlobStore {
    objects: ObjectStore,
}

impl BlobStore {
    /// A blob store over the given object store.
    #[must_use]
    pub fn new(objects: ObjectStore) -> Self {
        Self { objects }
    }

    fn key(reference: &str) -> String {
        format!("{BLOB_PREFIX}/{reference}")
    }

    /// True when `reference` has the `{sessionId}/{fileId}` shape. Callers
    /// validating client input check this first so malformed references
    /// fail as bad requests rather than storage errors.
    #[must_use]
    pub fn is_valid_reference(reference: &str) -> bool {
        Self::check_reference(reference).is_ok()
    }

    /// Validate a client-supplied `{sessionId}/{fileId}` reference.
    fn check_reference(reference: &str) -> Result<()> {
        let mut parts = reference.split('/');
        let ok = matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some(session), Some(file), None)
                if !session.is_empty()
                    && !file.is_empty()
                    && [session, file].iter().all(|part| {
                        part.chars()
                            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
                            && !part.starts_with('.')
                    })
        );
        if ok {
            Ok(())
        } else {
            Err(StateError::Unavailable(format!(
                "malformed blob reference {reference:?}"
            )))
        }
    }

    /// Store `bytes` for `session_id`, minting a fresh file id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Unavailable`] on backend failure.
    pub async fn put(&self, session_id: &str, bytes: Bytes) -> Result<BlobRef> {
        let reference = format!("{session_id}/{}", Uuid::new_v4().simple());
        let size = bytes.len() as u64;
        self.objects.put(&Self::key(&reference), bytes).await?;
        Ok(BlobRef { reference, size })
    }

    /// Fetch the bytes behind a `{sessionId}/{fileId}` reference.
    ///
    /// # Errors
    ///
    /// [`StateError::NotFound`] for unknown references, or
    /// [`StateError::Unavailable`] for malformed ones and backend
    /// failures.
    pub async fn get(&self, reference: &str) -> Result<Bytes> {
        Self::check_reference(reference)?;
        self.objects.get(&Self::key(reference)).await
    }

    /// Whether the backing object store answers requests.
    pub async fn healthy(&self) -> bool {
        self.objects.healthy().await
    }
}
