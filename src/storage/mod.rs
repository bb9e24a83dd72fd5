//! Storage Gateway (spec §4.1): one async API over an object store and a local
//! filesystem, partitioned per user by key prefix.

mod cloud;
mod keys;
mod local;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use object_store::aws::AmazonS3Builder;
use object_store::ObjectStore;

use crate::config::{Config, Mode};
use crate::error::StorageError;

pub use keys::{
    upload_chunk_key, upload_chunk_prefix, upload_tracker_key, user_hash, ANONYMOUS_EMAIL,
};

use cloud::CloudBackend;
use local::LocalBackend;

#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

enum Backend {
    Local(LocalBackend),
    Cloud(CloudBackend),
}

/// Storage Gateway scoped to one user. Every key it forms is rooted at that
/// user's hash prefix; there is no way to request a key outside of it.
pub struct StorageGateway {
    backend: Arc<Backend>,
    user_hash: String,
}

impl StorageGateway {
    /// Build a gateway for `user_email` from process configuration. Anonymous
    /// callers should pass `keys::ANONYMOUS_EMAIL`.
    pub fn new(cfg: &Config, user_email: &str) -> anyhow::Result<Self> {
        let backend = match cfg.mode {
            Mode::Local => Backend::Local(LocalBackend::new(cfg.data_dir.clone())),
            Mode::Remote => {
                let bucket = cfg
                    .bucket_name
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("bucket_name required in remote mode"))?;
                let store: Box<dyn ObjectStore> = Box::new(
                    AmazonS3Builder::from_env()
                        .with_bucket_name(bucket)
                        .build()?,
                );
                Backend::Cloud(CloudBackend::new(store))
            }
        };

        Ok(Self {
            backend: Arc::new(backend),
            user_hash: user_hash(user_email),
        })
    }

    /// Build a gateway directly over a local root, bypassing `Config` — used by
    /// the upload assembler and tests that need a bare filesystem scope.
    pub fn local(root: PathBuf, user_email: &str) -> Self {
        Self {
            backend: Arc::new(Backend::Local(LocalBackend::new(root))),
            user_hash: user_hash(user_email),
        }
    }

    pub fn user_hash(&self) -> &str {
        &self.user_hash
    }

    fn key(&self, filename: &str, session_id: Option<&str>) -> String {
        keys::session_key(&self.user_hash, session_id, filename)
    }

    /// Writes `content` atomically to `users/{user_hash}/[session_id/]filename`.
    pub async fn save(
        &self,
        content: &[u8],
        filename: &str,
        session_id: Option<&str>,
    ) -> Result<String, StorageError> {
        let key = self.key(filename, session_id);
        match self.backend.as_ref() {
            Backend::Local(b) => b.save(&key, content).await?,
            Backend::Cloud(b) => b.save(&key, content).await?,
        }
        Ok(key)
    }

    /// Concatenates a sequence of byte chunks and writes the result as one
    /// atomic object. Used only by upload assembly (spec §4.2 step 3).
    pub async fn save_stream<I>(
        &self,
        chunks: I,
        filename: &str,
        session_id: Option<&str>,
    ) -> Result<String, StorageError>
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let mut buf = Vec::new();
        for chunk in chunks {
            buf.extend_from_slice(&chunk);
        }
        self.save(&buf, filename, session_id).await
    }

    pub async fn get(
        &self,
        filename: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<u8>, StorageError> {
        let key = self.key(filename, session_id);
        match self.backend.as_ref() {
            Backend::Local(b) => b.get(&key).await,
            Backend::Cloud(b) => b.get(&key).await,
        }
    }

    pub async fn delete(
        &self,
        filename: &str,
        session_id: Option<&str>,
    ) -> Result<bool, StorageError> {
        let key = self.key(filename, session_id);
        match self.backend.as_ref() {
            Backend::Local(b) => b.delete(&key).await,
            Backend::Cloud(b) => b.delete(&key).await,
        }
    }

    /// Lists objects under the computed prefix, with `name` relative to it.
    pub async fn list(
        &self,
        prefix: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<ObjectInfo>, StorageError> {
        let full_prefix = self.key(prefix, session_id);
        match self.backend.as_ref() {
            Backend::Local(b) => b.list(&full_prefix).await,
            Backend::Cloud(b) => b.list(&full_prefix).await,
        }
    }

    /// Opaque URL the Dispatch API can hand back to a client to fetch this object.
    pub fn get_url(&self, filename: &str, session_id: Option<&str>) -> String {
        match session_id {
            Some(session_id) => format!("/storage/{}/{}/{}", self.user_hash, session_id, filename),
            None => format!("/storage/{}/{}", self.user_hash, filename),
        }
    }

    /// Raw key operations for callers (the upload assembler) that need to address
    /// the `_upload_sessions/` prefix directly, outside the per-session namespace.
    pub async fn save_raw(&self, key: &str, content: &[u8]) -> Result<(), StorageError> {
        match self.backend.as_ref() {
            Backend::Local(b) => b.save(key, content).await,
            Backend::Cloud(b) => b.save(key, content).await,
        }
    }

    pub async fn get_raw(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        match self.backend.as_ref() {
            Backend::Local(b) => b.get(key).await,
            Backend::Cloud(b) => b.get(key).await,
        }
    }

    pub async fn delete_raw(&self, key: &str) -> Result<bool, StorageError> {
        match self.backend.as_ref() {
            Backend::Local(b) => b.delete(key).await,
            Backend::Cloud(b) => b.delete(key).await,
        }
    }

    pub async fn list_raw(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        match self.backend.as_ref() {
            Backend::Local(b) => b.list(prefix).await,
            Backend::Cloud(b) => b.list(prefix).await,
        }
    }
}

impl Clone for StorageGateway {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            user_hash: self.user_hash.clone(),
        }
    }
}
