//! In-process asset storage.

use super::{AssetStorage, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Stored object bytes with their content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Raw bytes.
    pub bytes: Vec<u8>,
    /// MIME type supplied at upload.
    pub content_type: String,
}

/// [`AssetStorage`] keeping objects in a map; URLs use the `memory://` scheme.
#[derive(Default)]
pub struct MemoryAssetStorage {
    objects: RwLock<HashMap<String, StoredObject>>,
    upload_base: Option<String>,
}

impl MemoryAssetStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage whose signed upload URLs point at `base` instead of `memory://upload`.
    pub fn with_upload_base(base: impl Into<String>) -> Self {
        Self {
            upload_base: Some(base.into()),
            ..Self::default()
        }
    }

    /// Fetch a stored object.
    pub async fn get(&self, path: &str) -> Option<StoredObject> {
        self.objects.read().await.get(path).cloned()
    }
}

#[async_trait]
impl AssetStorage for MemoryAssetStorage {
    async fn create_signed_upload_url(&self, path: &str) -> Result<String, StorageError> {
        let base = self
            .upload_base
            .as_deref()
            .unwrap_or("memory://upload")
            .trim_end_matches('/');
        Ok(format!(
            "{base}/{path}?token={}",
            uuid::Uuid::new_v4().simple()
        ))
    }

    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> Result<(), StorageError> {
        let mut objects = self.objects.write().await;
        if !upsert && objects.contains_key(path) {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }
        objects.insert(
            path.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("memory://public/{path}")
    }

    async fn remove(&self, paths: &[String]) -> Result<(), StorageError> {
        let mut objects = self.objects.write().await;
        for path in paths {
            objects.remove(path);
        }
        Ok(())
    }
}
