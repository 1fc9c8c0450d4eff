//! In-memory bundle store

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::{check_prefix, key_for, BundleStore, StoreError};
use crate::types::{BundleEnvelope, EvidenceBundle, LatestPointer, StoredBundle};

#[derive(Default)]
pub struct MemoryBundleStore {
    bundles: RwLock<HashMap<String, StoredBundle>>,
    latest: RwLock<Option<LatestPointer>>,
    read_only: AtomicBool,
}

impl MemoryBundleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While read-only every write fails with a permission error, standing in
    /// for a full or unwritable disk.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.bundles.read().await.len()
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "store is read-only",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BundleStore for MemoryBundleStore {
    async fn put(
        &self,
        bundle: &EvidenceBundle,
        hash: &str,
        envelope: BundleEnvelope,
    ) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let prefix = key_for(hash)?;
        let mut bundles = self.bundles.write().await;
        if let Some(existing) = bundles.get(&prefix) {
            if existing.hash == hash {
                return Ok(());
            }
            return Err(StoreError::PrefixCollision {
                prefix,
                existing: existing.hash.clone(),
            });
        }
        bundles.insert(
            prefix,
            StoredBundle {
                bundle: bundle.clone(),
                hash: hash.to_string(),
                envelope,
            },
        );
        Ok(())
    }

    async fn get(&self, hash_prefix: &str) -> Result<Option<StoredBundle>, StoreError> {
        check_prefix(hash_prefix)?;
        Ok(self.bundles.read().await.get(hash_prefix).cloned())
    }

    async fn latest_pointer(&self) -> Result<Option<LatestPointer>, StoreError> {
        Ok(self.latest.read().await.clone())
    }

    async fn set_latest_pointer(&self, pointer: &LatestPointer) -> Result<(), StoreError> {
        self.ensure_writable()?;
        check_prefix(&pointer.hash_prefix)?;
        if !self
            .bundles
            .read()
            .await
            .contains_key(&pointer.hash_prefix)
        {
            return Err(StoreError::Unavailable(format!(
                "refusing to point at missing bundle {}",
                pointer.hash_prefix
            )));
        }
        *self.latest.write().await = Some(pointer.clone());
        Ok(())
    }
}
