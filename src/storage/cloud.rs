//! Object-store Storage Gateway backend, built on the `object_store` crate.

use object_store::path::Path as ObjectPath;
use object_store::{GetOptions, ObjectStore, PutMode, PutOptions, PutPayload};

use crate::error::StorageError;

use super::ObjectInfo;

pub struct CloudBackend {
    store: Box<dyn ObjectStore>,
}

impl CloudBackend {
    pub fn new(store: Box<dyn ObjectStore>) -> Self {
        Self { store }
    }

    fn path(key: &str) -> ObjectPath {
        ObjectPath::from(key)
    }

    pub async fn save(&self, key: &str, content: &[u8]) -> Result<(), StorageError> {
        let opts = if key.ends_with(".json") {
            PutOptions {
                mode: PutMode::Overwrite,
                cache_control: Some("no-cache, max-age=0".to_string()),
                ..Default::default()
            }
        } else {
            PutOptions::default()
        };

        self.store
            .put_opts(&Self::path(key), PutPayload::from(content.to_vec()), opts)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        // Force a metadata reload before reading: `GetOptions::default()` bypasses
        // any cached HEAD the backend may have retained from a previous miss.
        let result = self
            .store
            .get_opts(&Self::path(key), GetOptions::default())
            .await
            .map_err(|e| match e {
                object_store::Error::NotFound { .. } => StorageError::NotFound(key.to_string()),
                other => StorageError::Backend(other.to_string()),
            })?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    pub async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        match self.store.delete(&Self::path(key)).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::Backend(e.to_string())),
        }
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        use futures::TryStreamExt;

        let prefix_path = Self::path(prefix);
        let mut stream = self.store.list(Some(&prefix_path));
        let mut out = Vec::new();
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        {
            let name = meta
                .location
                .as_ref()
                .strip_prefix(prefix_path.as_ref())
                .unwrap_or(meta.location.as_ref())
                .trim_start_matches('/')
                .to_string();
            out.push(ObjectInfo {
                name,
                size: meta.size as u64,
                modified: Some(meta.last_modified),
            });
        }
        Ok(out)
    }
}
