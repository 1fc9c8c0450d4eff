//! Bundle Store - content-addressed persistence of evidence bundles
//!
//! One record per bundle keyed by hash prefix, plus a singleton "latest"
//! pointer. The pointer is only ever written after the bundle it names.

mod file;
mod memory;

pub use file::FileBundleStore;
pub use memory::MemoryBundleStore;

use async_trait::async_trait;

use crate::evidence::{hash_prefix, is_full_hash, is_hash_prefix};
use crate::types::{BundleEnvelope, EvidenceBundle, LatestPointer, StoredBundle};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid bundle key {0:?}")]
    InvalidKey(String),
    #[error("prefix {prefix} already holds a different bundle ({existing})")]
    PrefixCollision { prefix: String, existing: String },
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store record is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait BundleStore: Send + Sync {
    /// Persist a bundle under the prefix of `hash`. Storing the same content
    /// twice is a no-op.
    async fn put(
        &self,
        bundle: &EvidenceBundle,
        hash: &str,
        envelope: BundleEnvelope,
    ) -> Result<(), StoreError>;

    /// Bundle stored at `hash_prefix`, if any
    async fn get(&self, hash_prefix: &str) -> Result<Option<StoredBundle>, StoreError>;

    async fn latest_pointer(&self) -> Result<Option<LatestPointer>, StoreError>;

    /// Move the latest pointer. Implementations refuse pointers to bundles
    /// they do not hold.
    async fn set_latest_pointer(&self, pointer: &LatestPointer) -> Result<(), StoreError>;
}

/// Key under which a bundle with full hash `hash` is stored
pub(crate) fn key_for(hash: &str) -> Result<String, StoreError> {
    if !is_full_hash(hash) {
        return Err(StoreError::InvalidKey(hash.to_string()));
    }
    Ok(hash_prefix(hash).to_string())
}

pub(crate) fn check_prefix(prefix: &str) -> Result<(), StoreError> {
    if is_hash_prefix(prefix) {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(prefix.to_string()))
    }
}
