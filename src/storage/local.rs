//! Local-filesystem Storage Gateway backend: temp-file-then-rename atomic writes.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::StorageError;

use super::ObjectInfo;

pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub async fn save(&self, key: &str, content: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(key);
        let dir = path.parent().expect("key always has a parent under root");
        fs::create_dir_all(dir)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        // Write to a temp file in the same directory, then rename: the rename is
        // atomic on a POSIX filesystem, so no partial write is ever observable.
        let tmp_path = dir.join(format!(".{}.tmp-{}", uuid::Uuid::new_v4(), file_name(&path)));
        {
            let mut f = fs::File::create(&tmp_path)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            f.write_all(content)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            f.flush().await.map_err(|e| StorageError::Backend(e.to_string()))?;
        }
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key);
        fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Backend(e.to_string())
            }
        })
    }

    pub async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.resolve(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Backend(e.to_string())),
        }
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let dir = self.resolve(prefix);
        let mut out = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(StorageError::Backend(e.to_string())),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            if !meta.is_file() {
                continue;
            }
            out.push(ObjectInfo {
                name: entry.file_name().to_string_lossy().to_string(),
                size: meta.len(),
                modified: meta.modified().ok().map(chrono::DateTime::<chrono::Utc>::from),
            });
        }
        Ok(out)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().to_path_buf());
        backend.save("users/abc/s1/metadata.json", b"{}").await.unwrap();
        let bytes = backend.get("users/abc/s1/metadata.json").await.unwrap();
        assert_eq!(bytes, b"{}");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().to_path_buf());
        let err = backend.get("users/abc/missing.json").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_reports_whether_object_existed() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().to_path_buf());
        backend.save("users/abc/a.txt", b"x").await.unwrap();
        assert!(backend.delete("users/abc/a.txt").await.unwrap());
        assert!(!backend.delete("users/abc/a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn list_returns_files_under_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().to_path_buf());
        backend.save("users/abc/s1/pages/page_001.png", b"x").await.unwrap();
        backend.save("users/abc/s1/pages/page_002.png", b"x").await.unwrap();
        let listed = backend.list("users/abc/s1/pages").await.unwrap();
        assert_eq!(listed.len(), 2);
    }
}
