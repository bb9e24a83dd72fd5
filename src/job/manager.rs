//! Job Manager (spec §4.4): a dual-back-end job dispatcher, one API regardless
//! of deployment mode.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{Config, Mode};
use crate::error::JobError;
use crate::ocr::OcrWorker;
use crate::session::SessionStore;
use crate::storage::StorageGateway;

use super::{JobInput, JobPayload, JobProcessor, JobType};

const REMOTE_DISPATCH_TIMEOUT: Duration = Duration::from_secs(600);
const CONTINUATION_DELAY: Duration = Duration::from_secs(5);

pub struct JobManager {
    config: Arc<Config>,
    ocr: Arc<OcrWorker>,
    http: reqwest::Client,
    /// Bounds the local thread-pool-equivalent concurrency (spec §5: "Thread
    /// pool: size bounded to number of CPU cores").
    local_pool: Arc<tokio::sync::Semaphore>,
}

impl JobManager {
    pub fn new(config: Arc<Config>, ocr: Arc<OcrWorker>) -> Self {
        let pool_size = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .max(2);

        Self {
            config,
            ocr,
            http: reqwest::Client::new(),
            local_pool: Arc::new(tokio::sync::Semaphore::new(pool_size)),
        }
    }

    /// Creates a job, appends it to session metadata, and dispatches it to the
    /// configured backend. Returns once the job is durably recorded and handed
    /// off — not once it finishes running.
    pub async fn create_job(
        self: &Arc<Self>,
        session_id: &str,
        job_type: JobType,
        input_data: JobInput,
        user_email: &str,
    ) -> Result<String, JobError> {
        let job_id = uuid::Uuid::new_v4().to_string();

        let storage = StorageGateway::new(&self.config, user_email)
            .map_err(|e| JobError::Storage(crate::error::StorageError::Backend(e.to_string())))?;
        let session_store = SessionStore::new(storage.clone());
        session_store
            .append_job(session_id, &job_id, job_type)
            .await?;

        let payload = JobPayload {
            job_id: job_id.clone(),
            session_id: session_id.to_string(),
            job_type,
            input_data,
            user_email: user_email.to_string(),
        };

        match self.config.mode {
            Mode::Local => self.dispatch_local(payload, storage, session_store),
            Mode::Remote => self.dispatch_remote(payload).await?,
        }

        Ok(job_id)
    }

    fn dispatch_local(
        self: &Arc<Self>,
        payload: JobPayload,
        storage: StorageGateway,
        session_store: SessionStore,
    ) {
        let manager = Arc::clone(self);
        let ocr = Arc::clone(&self.ocr);
        let permit = Arc::clone(&self.local_pool);

        tokio::spawn(async move {
            // Acquire a pool slot before running; panics inside the job future
            // don't propagate past this spawned task (tokio isolates them).
            let _permit = permit.acquire().await;

            let processor = JobProcessor::new(storage, session_store, ocr);
            let job_id = payload.job_id.clone();
            let job_type = payload.job_type;
            let session_id = payload.session_id.clone();

            let result = processor.process_job(payload, &manager).await;
            match result {
                Ok(()) => info!(
                    job_id,
                    job_type = job_type.as_str(),
                    session_id,
                    status = "success",
                    message = "job completed"
                ),
                Err(e) => info!(
                    job_id,
                    job_type = job_type.as_str(),
                    session_id,
                    status = "failed",
                    message = %e
                ),
            }
        });
    }

    async fn dispatch_remote(&self, payload: JobPayload) -> Result<(), JobError> {
        let worker_url = self
            .config
            .worker_url
            .clone()
            .ok_or_else(|| JobError::DispatchFailure("worker_url not configured".to_string()))?;

        let delay = matches!(
            &payload.input_data,
            JobInput::ExtractPages(i) if i.start_page > 1
        ) || matches!(
            &payload.input_data,
            JobInput::Ocr(i) if i.start_page > 1
        );

        let http = self.http.clone();
        let endpoint = format!("{worker_url}/worker/process-job");

        tokio::spawn(async move {
            if delay {
                tokio::time::sleep(CONTINUATION_DELAY).await;
            }
            let result = http
                .post(&endpoint)
                .timeout(REMOTE_DISPATCH_TIMEOUT)
                .json(&payload)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    info!(job_id = %payload.job_id, "remote dispatch accepted");
                }
                Ok(resp) => {
                    warn!(job_id = %payload.job_id, status = %resp.status(), "remote dispatch rejected");
                }
                Err(e) => {
                    warn!(job_id = %payload.job_id, error = %e, "remote dispatch failed");
                }
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_ALLOWED_EXTENSIONS, DEFAULT_MAX_FILE_SIZE_BYTES};
    use crate::job::OcrInput;

    fn local_config(data_dir: std::path::PathBuf) -> Config {
        Config {
            mode: Mode::Local,
            data_dir,
            bucket_name: None,
            worker_url: None,
            model_name: "m".into(),
            device: "cpu".into(),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            bind_address: "127.0.0.1:0".into(),
        }
    }

    #[tokio::test]
    async fn create_job_appends_job_record_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Arc::new(local_config(dir.path().to_path_buf()));
        let storage = StorageGateway::new(&cfg, "user@example.com").unwrap();
        let sessions = SessionStore::new(storage.clone());
        let session_id = sessions.create_session("user@example.com").await.unwrap();

        let ocr = OcrWorker::new(&cfg);
        let manager = Arc::new(JobManager::new(Arc::clone(&cfg), ocr));

        // total_pages: 0 means the spawned local dispatch finds nothing to do and
        // exits immediately, so this stays deterministic regardless of scheduling.
        let job_id = manager
            .create_job(
                &session_id,
                JobType::Ocr,
                JobInput::Ocr(OcrInput {
                    total_pages: 0,
                    start_page: 1,
                }),
                "user@example.com",
            )
            .await
            .unwrap();

        let metadata = sessions.load_metadata(&session_id).await.unwrap();
        assert_eq!(metadata.jobs.len(), 1);
        assert_eq!(metadata.jobs[0].job_id, job_id);
    }
}
