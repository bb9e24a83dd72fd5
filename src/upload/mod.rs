//! Upload Assembler (spec §4.2): a three-call client-led protocol (start → chunk
//! → assemble) over the Storage Gateway, serialized per `upload_id`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{StorageError, UploadError, ValidationError};
use crate::storage::{upload_chunk_key, upload_chunk_prefix, upload_tracker_key, StorageGateway};

const CHUNK_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackerStatus {
    Active,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTracker {
    pub upload_id: String,
    pub filename: String,
    pub total_size: u64,
    pub total_chunks: u32,
    pub chunks_received: u32,
    pub chunks: HashSet<u32>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
    pub user_email: String,
    /// Session this upload belongs to; the assembled file is written under
    /// this session's prefix so later job/status calls can find it.
    pub session_id: String,
    pub status: TrackerStatus,
}

pub enum ChunkOutcome {
    Received,
    Duplicate,
}

pub enum AssembleOutcome {
    Complete { filename: String, session_id: String },
    Incomplete { missing_chunks: Vec<u32> },
}

/// Serializes start/chunk/assemble operations per `upload_id`, guaranteeing that
/// assembly runs exactly once from exactly the chunks declared at start.
pub struct UploadAssembler {
    storage: StorageGateway,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UploadAssembler {
    pub fn new(storage: StorageGateway) -> Self {
        Self {
            storage,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, upload_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(upload_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    pub async fn start(
        &self,
        filename: String,
        total_size: u64,
        total_chunks: u32,
        user_email: &str,
        session_id: String,
    ) -> Result<String, StorageError> {
        let upload_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let tracker = UploadTracker {
            upload_id: upload_id.clone(),
            filename,
            total_size,
            total_chunks,
            chunks_received: 0,
            chunks: HashSet::new(),
            created_at: now,
            updated_at: now,
            user_email: user_email.to_string(),
            session_id,
            status: TrackerStatus::Active,
        };
        self.persist_tracker(&tracker).await?;
        Ok(upload_id)
    }

    pub async fn upload_chunk(
        &self,
        upload_id: &str,
        chunk_number: u32,
        chunk_bytes: &[u8],
    ) -> Result<ChunkOutcome, UploadError> {
        let guard = self.lock_for(upload_id).await;
        let _held = guard.lock().await;

        let mut tracker = self.load_tracker(upload_id).await?;

        if chunk_number >= tracker.total_chunks {
            return Err(UploadError::Validation(ValidationError::ChunkOutOfRange(
                chunk_number,
                tracker.total_chunks,
            )));
        }

        if tracker.chunks.contains(&chunk_number) {
            return Ok(ChunkOutcome::Duplicate);
        }

        let key = upload_chunk_key(upload_id, chunk_number);
        tokio::time::timeout(
            CHUNK_WRITE_TIMEOUT,
            self.storage.save_raw(&key, chunk_bytes),
        )
        .await
        .map_err(|_| UploadError::Timeout)??;

        tracker.chunks.insert(chunk_number);
        tracker.chunks_received = tracker.chunks.len() as u32;
        tracker.updated_at = Utc::now();
        self.persist_tracker(&tracker).await?;

        // Read back to confirm the write landed, exposing object-store
        // consistency bugs at the call boundary rather than downstream.
        let confirmed = self.load_tracker(upload_id).await?;
        debug_assert_eq!(confirmed.chunks_received, tracker.chunks_received);

        Ok(ChunkOutcome::Received)
    }

    pub async fn assemble(&self, upload_id: &str) -> Result<AssembleOutcome, UploadError> {
        let guard = self.lock_for(upload_id).await;
        let _held = guard.lock().await;

        let tracker = self.load_tracker(upload_id).await?;

        let observed: HashSet<u32> = self
            .storage
            .list_raw(&upload_chunk_prefix(upload_id))
            .await?
            .into_iter()
            .filter_map(|o| parse_chunk_number(&o.name))
            .collect();

        let missing: Vec<u32> = (0..tracker.total_chunks)
            .filter(|n| !observed.contains(n))
            .collect();

        if !missing.is_empty() {
            return Ok(AssembleOutcome::Incomplete {
                missing_chunks: missing,
            });
        }

        let mut chunks = Vec::with_capacity(tracker.total_chunks as usize);
        for n in 0..tracker.total_chunks {
            chunks.push(self.storage.get_raw(&upload_chunk_key(upload_id, n)).await?);
        }

        self.storage
            .save_stream(chunks, &tracker.filename, Some(&tracker.session_id))
            .await?;

        for n in 0..tracker.total_chunks {
            let _ = self.storage.delete_raw(&upload_chunk_key(upload_id, n)).await;
        }
        let _ = self.storage.delete_raw(&upload_tracker_key(upload_id)).await;

        Ok(AssembleOutcome::Complete {
            filename: tracker.filename,
            session_id: tracker.session_id,
        })
    }

    async fn load_tracker(&self, upload_id: &str) -> Result<UploadTracker, UploadError> {
        let bytes = self
            .storage
            .get_raw(&upload_tracker_key(upload_id))
            .await
            .map_err(|e| match e {
                StorageError::NotFound(_) => UploadError::NotFound(upload_id.to_string()),
                other => UploadError::Storage(other),
            })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| UploadError::Storage(StorageError::Backend(e.to_string())))
    }

    async fn persist_tracker(&self, tracker: &UploadTracker) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(tracker)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        self.storage
            .save_raw(&upload_tracker_key(&tracker.upload_id), &bytes)
            .await
    }
}

fn parse_chunk_number(name: &str) -> Option<u32> {
    name.strip_prefix("chunk_")?
        .strip_suffix(".bin")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> (tempfile::TempDir, StorageGateway) {
        let dir = tempfile::tempdir().unwrap();
        let gw = StorageGateway::local(dir.path().to_path_buf(), "user@example.com");
        (dir, gw)
    }

    #[tokio::test]
    async fn happy_path_two_chunks() {
        let (_dir, gw) = gateway();
        let assembler = UploadAssembler::new(gw);
        let upload_id = assembler
            .start("a.pdf".into(), 2048, 2, "user@example.com", "s1".into())
            .await
            .unwrap();

        assembler.upload_chunk(&upload_id, 0, &[b'A'; 1024]).await.unwrap();
        assembler.upload_chunk(&upload_id, 1, &[b'B'; 1024]).await.unwrap();

        match assembler.assemble(&upload_id).await.unwrap() {
            AssembleOutcome::Complete { filename, session_id } => {
                assert_eq!(filename, "a.pdf");
                assert_eq!(session_id, "s1");
            }
            AssembleOutcome::Incomplete { .. } => panic!("expected complete"),
        }
    }

    #[tokio::test]
    async fn out_of_order_chunks_reassemble_in_order() {
        let (_dir, gw) = gateway();
        let assembler = UploadAssembler::new(gw.clone());
        let upload_id = assembler
            .start("a.bin".into(), 3, 3, "user@example.com", "s1".into())
            .await
            .unwrap();

        assembler.upload_chunk(&upload_id, 2, b"C").await.unwrap();
        assembler.upload_chunk(&upload_id, 0, b"A").await.unwrap();
        assembler.upload_chunk(&upload_id, 1, b"B").await.unwrap();

        assembler.assemble(&upload_id).await.unwrap();
        let bytes = gw.get("a.bin", Some("s1")).await.unwrap();
        assert_eq!(bytes, b"ABC");
    }

    #[tokio::test]
    async fn duplicate_chunk_does_not_double_count() {
        let (_dir, gw) = gateway();
        let assembler = UploadAssembler::new(gw);
        let upload_id = assembler
            .start("a.bin".into(), 2, 2, "user@example.com", "s1".into())
            .await
            .unwrap();

        assembler.upload_chunk(&upload_id, 0, b"A").await.unwrap();
        let outcome = assembler.upload_chunk(&upload_id, 0, b"A").await.unwrap();
        assert!(matches!(outcome, ChunkOutcome::Duplicate));

        let tracker = assembler.load_tracker(&upload_id).await.unwrap();
        assert_eq!(tracker.chunks_received, 1);
    }

    #[tokio::test]
    async fn chunk_number_at_or_past_total_is_rejected() {
        let (_dir, gw) = gateway();
        let assembler = UploadAssembler::new(gw);
        let upload_id = assembler
            .start("a.bin".into(), 2, 2, "user@example.com", "s1".into())
            .await
            .unwrap();

        let err = assembler.upload_chunk(&upload_id, 2, b"X").await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::Validation(ValidationError::ChunkOutOfRange(2, 2))
        ));

        let tracker = assembler.load_tracker(&upload_id).await.unwrap();
        assert_eq!(tracker.chunks_received, 0);
    }

    #[tokio::test]
    async fn assemble_with_missing_chunk_reports_it_and_keeps_state() {
        let (_dir, gw) = gateway();
        let assembler = UploadAssembler::new(gw);
        let upload_id = assembler
            .start("a.bin".into(), 3, 3, "user@example.com", "s1".into())
            .await
            .unwrap();

        assembler.upload_chunk(&upload_id, 0, b"A").await.unwrap();
        assembler.upload_chunk(&upload_id, 2, b"C").await.unwrap();

        match assembler.assemble(&upload_id).await.unwrap() {
            AssembleOutcome::Incomplete { missing_chunks } => assert_eq!(missing_chunks, vec![1]),
            AssembleOutcome::Complete { .. } => panic!("expected incomplete"),
        }

        // tracker and chunks must still be present for a retry.
        assembler.load_tracker(&upload_id).await.unwrap();
    }

    #[tokio::test]
    async fn assemble_twice_fails_not_found_on_second_call() {
        let (_dir, gw) = gateway();
        let assembler = UploadAssembler::new(gw);
        let upload_id = assembler
            .start("a.bin".into(), 1, 1, "user@example.com", "s1".into())
            .await
            .unwrap();
        assembler.upload_chunk(&upload_id, 0, b"A").await.unwrap();
        assembler.assemble(&upload_id).await.unwrap();

        let err = assembler.assemble(&upload_id).await.unwrap_err();
        assert!(matches!(err, UploadError::NotFound(_)));
    }

    #[tokio::test]
    async fn assembled_file_lands_under_the_upload_session_prefix() {
        let (_dir, gw) = gateway();
        let assembler = UploadAssembler::new(gw.clone());
        let upload_id = assembler
            .start("a.pdf".into(), 1, 1, "user@example.com", "session-42".into())
            .await
            .unwrap();
        assembler.upload_chunk(&upload_id, 0, b"A").await.unwrap();
        assembler.assemble(&upload_id).await.unwrap();

        // the job processor later reads the source document from this exact
        // location (filename under the session prefix, not the bare root).
        let bytes = gw.get("a.pdf", Some("session-42")).await.unwrap();
        assert_eq!(bytes, b"A");
        assert!(gw.get("a.pdf", None).await.is_err());
    }
}
