//! JSON-file bundle store
//!
//! Layout under `data_dir`:
//! - `bundles/<prefix>.json` one pretty-printed [`StoredBundle`] per bundle
//! - `latest.json` the [`LatestPointer`]
//!
//! Every write goes to a temporary sibling first and is renamed into place,
//! so readers never observe half-written records.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{check_prefix, key_for, BundleStore, StoreError};
use crate::types::{BundleEnvelope, EvidenceBundle, LatestPointer, StoredBundle};

pub struct FileBundleStore {
    data_dir: PathBuf,
}

impl FileBundleStore {
    /// Open (and create if needed) a store rooted at `data_dir`
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(data_dir.join("bundles"))?;
        info!(data_dir = %data_dir.display(), "Bundle store opened");
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the record for `prefix`
    pub fn bundle_path(&self, prefix: &str) -> PathBuf {
        self.data_dir.join("bundles").join(format!("{}.json", prefix))
    }

    fn pointer_path(&self) -> PathBuf {
        self.data_dir.join("latest.json")
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        path: &Path,
    ) -> Result<Option<T>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BundleStore for FileBundleStore {
    async fn put(
        &self,
        bundle: &EvidenceBundle,
        hash: &str,
        envelope: BundleEnvelope,
    ) -> Result<(), StoreError> {
        let prefix = key_for(hash)?;
        let path = self.bundle_path(&prefix);

        if let Some(existing) = Self::read_json::<StoredBundle>(&path).await? {
            if existing.hash == hash {
                debug!(prefix = %prefix, "Bundle already stored");
                return Ok(());
            }
            return Err(StoreError::PrefixCollision {
                prefix,
                existing: existing.hash,
            });
        }

        let record = StoredBundle {
            bundle: bundle.clone(),
            hash: hash.to_string(),
            envelope,
        };
        let bytes = serde_json::to_vec_pretty(&record)?;
        Self::write_atomic(&path, &bytes).await?;
        debug!(prefix = %prefix, bytes = bytes.len(), "Bundle stored");
        Ok(())
    }

    async fn get(&self, hash_prefix: &str) -> Result<Option<StoredBundle>, StoreError> {
        check_prefix(hash_prefix)?;
        Self::read_json(&self.bundle_path(hash_prefix)).await
    }

    async fn latest_pointer(&self) -> Result<Option<LatestPointer>, StoreError> {
        Self::read_json(&self.pointer_path()).await
    }

    async fn set_latest_pointer(&self, pointer: &LatestPointer) -> Result<(), StoreError> {
        check_prefix(&pointer.hash_prefix)?;
        if tokio::fs::metadata(self.bundle_path(&pointer.hash_prefix))
            .await
            .is_err()
        {
            return Err(StoreError::Unavailable(format!(
                "refusing to point at missing bundle {}",
                pointer.hash_prefix
            )));
        }
        let bytes = serde_json::to_vec_pretty(pointer)?;
        Self::write_atomic(&self.pointer_path(), &bytes).await
    }
}
