//! Session & Status Store (spec §4.3): session metadata and the derived
//! `status.json`, rebuilt by scanning storage rather than maintained incrementally.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{JobError, StorageError};
use crate::job::JobType;
use crate::storage::StorageGateway;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRef {
    pub job_id: String,
    pub job_type: JobType,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub user_email: String,
    pub user_hash: String,
    pub created_at: chrono::DateTime<Utc>,
    #[serde(default)]
    pub jobs: Vec<JobRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Processing,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDocument {
    pub status: StageStatus,
    pub total_pages: u32,
    pub pages_processed: u32,
    pub progress_percent: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDocument {
    pub session_id: String,
    pub stages: HashMap<String, StageDocument>,
    pub updated_at: chrono::DateTime<Utc>,
}

const METADATA_FILE: &str = "metadata.json";
const STATUS_FILE: &str = "status.json";

/// Provides the read/write surface for `metadata.json` and the derived
/// `status.json`, serializing `metadata.json` updates per session.
pub struct SessionStore {
    storage: StorageGateway,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    pub fn new(storage: StorageGateway) -> Self {
        Self {
            storage,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    pub async fn create_session(&self, user_email: &str) -> Result<String, StorageError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let metadata = SessionMetadata {
            session_id: session_id.clone(),
            user_email: user_email.to_string(),
            user_hash: self.storage.user_hash().to_string(),
            created_at: Utc::now(),
            jobs: Vec::new(),
        };
        self.persist_metadata(&session_id, &metadata).await?;
        Ok(session_id)
    }

    /// Serialized append to `metadata.json.jobs`: the per-session lock guarantees
    /// concurrent job creations never lose an entry (spec §3, §5).
    pub async fn append_job(
        &self,
        session_id: &str,
        job_id: &str,
        job_type: JobType,
    ) -> Result<(), JobError> {
        let guard = self.lock_for(session_id).await;
        let _held = guard.lock().await;

        let mut metadata = self.load_metadata(session_id).await?;
        metadata.jobs.push(JobRef {
            job_id: job_id.to_string(),
            job_type,
            created_at: Utc::now(),
        });
        self.persist_metadata(session_id, &metadata).await?;
        Ok(())
    }

    pub async fn load_metadata(&self, session_id: &str) -> Result<SessionMetadata, JobError> {
        let bytes = self
            .storage
            .get(METADATA_FILE, Some(session_id))
            .await
            .map_err(|e| match e {
                StorageError::NotFound(_) => JobError::SessionNotFound(session_id.to_string()),
                other => JobError::Storage(other),
            })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| JobError::Storage(StorageError::Backend(e.to_string())))
    }

    async fn persist_metadata(
        &self,
        session_id: &str,
        metadata: &SessionMetadata,
    ) -> Result<(), StorageError> {
        let bytes =
            serde_json::to_vec(metadata).map_err(|e| StorageError::Backend(e.to_string()))?;
        self.storage.save(&bytes, METADATA_FILE, Some(session_id)).await?;
        Ok(())
    }

    pub async fn get_session_status(
        &self,
        session_id: &str,
    ) -> Result<Option<StatusDocument>, StorageError> {
        match self.storage.get(STATUS_FILE, Some(session_id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The derivation algorithm (spec §4.3): recompute `status.json` entirely
    /// from `pages/` and `results/` file counts. Never trusts the prior value.
    pub async fn rebuild_status(
        &self,
        session_id: &str,
        known_total_pages: Option<u32>,
    ) -> Result<StatusDocument, StorageError> {
        let pages = self.storage.list("pages", Some(session_id)).await?;
        let pages_extracted = pages
            .iter()
            .filter(|o| is_numbered_file(&o.name, "page_", ".png"))
            .count() as u32;

        let results = self.storage.list("results", Some(session_id)).await?;
        let ocr_completed = results
            .iter()
            .filter(|o| is_numbered_file(&o.name, "page_", ".txt"))
            .count() as u32;

        let total = known_total_pages.unwrap_or(pages_extracted);

        let mut stages = HashMap::new();

        if pages_extracted > 0 || known_total_pages.is_some_and(|t| t > 0) {
            stages.insert(
                "page_extraction".to_string(),
                stage(pages_extracted, total),
            );
        }

        if ocr_completed > 0 || (pages_extracted > 0 && known_total_pages.is_some()) {
            stages.insert("ocr".to_string(), stage(ocr_completed, total));
        }

        let doc = StatusDocument {
            session_id: session_id.to_string(),
            stages,
            updated_at: Utc::now(),
        };

        let bytes = serde_json::to_vec(&doc).map_err(|e| StorageError::Backend(e.to_string()))?;
        self.storage.save(&bytes, STATUS_FILE, Some(session_id)).await?;

        Ok(doc)
    }
}

fn stage(processed: u32, total: u32) -> StageDocument {
    let progress_percent = if total > 0 {
        ((processed as f64 / total as f64) * 100.0).round() as u32
    } else {
        0
    };
    StageDocument {
        status: if processed == total && total > 0 {
            StageStatus::Complete
        } else {
            StageStatus::Processing
        },
        total_pages: total,
        pages_processed: processed,
        progress_percent,
    }
}

fn is_numbered_file(name: &str, prefix: &str, suffix: &str) -> bool {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(suffix))
        .map(|digits| digits.len() == 3 && digits.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, StorageGateway, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let gw = StorageGateway::local(dir.path().to_path_buf(), "user@example.com");
        let session_store = SessionStore::new(gw.clone());
        (dir, gw, session_store)
    }

    #[tokio::test]
    async fn create_session_then_append_job_is_durable() {
        let (_dir, _gw, store) = store();
        let session_id = store.create_session("user@example.com").await.unwrap();
        store
            .append_job(&session_id, "job-1", JobType::ExtractPages)
            .await
            .unwrap();
        let metadata = store.load_metadata(&session_id).await.unwrap();
        assert_eq!(metadata.jobs.len(), 1);
        assert_eq!(metadata.jobs[0].job_id, "job-1");
    }

    #[tokio::test]
    async fn rebuild_status_is_idempotent_on_idle_session() {
        let (_dir, _gw, store) = store();
        let session_id = store.create_session("user@example.com").await.unwrap();
        let first = store.rebuild_status(&session_id, None).await.unwrap();
        let second = store.rebuild_status(&session_id, None).await.unwrap();
        assert_eq!(first.stages.len(), second.stages.len());
        assert!(first.stages.is_empty());
    }

    #[tokio::test]
    async fn rebuild_status_counts_extracted_pages() {
        let (_dir, gw, store) = store();
        let session_id = store.create_session("user@example.com").await.unwrap();
        gw.save(b"png-bytes", "pages/page_001.png", Some(&session_id))
            .await
            .unwrap();
        gw.save(b"png-bytes", "pages/page_002.png", Some(&session_id))
            .await
            .unwrap();

        let status = store.rebuild_status(&session_id, Some(3)).await.unwrap();
        let stage = status.stages.get("page_extraction").unwrap();
        assert_eq!(stage.pages_processed, 2);
        assert_eq!(stage.total_pages, 3);
        assert_eq!(stage.status, StageStatus::Processing);
    }
}
