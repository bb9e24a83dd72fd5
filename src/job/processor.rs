//! Job Processor (spec §4.5): converts a job payload into storage side effects
//! and, when necessary, a continuation job.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::JobError;
use crate::ocr::OcrWorker;
use crate::session::SessionStore;
use crate::storage::StorageGateway;

use super::render;
use super::{ExtractPagesInput, JobInput, JobManager, JobPayload, JobType, OcrInput};
use super::{EXTRACT_PAGES_BATCH, OCR_BATCH};

const EXTRACT_DPI: u32 = 150;

pub struct JobProcessor {
    storage: StorageGateway,
    sessions: SessionStore,
    ocr: Arc<OcrWorker>,
}

impl JobProcessor {
    pub fn new(storage: StorageGateway, sessions: SessionStore, ocr: Arc<OcrWorker>) -> Self {
        Self {
            storage,
            sessions,
            ocr,
        }
    }

    pub async fn process_job(
        &self,
        payload: JobPayload,
        manager: &Arc<JobManager>,
    ) -> Result<(), JobError> {
        match (&payload.job_type, &payload.input_data) {
            (JobType::ExtractPages, JobInput::ExtractPages(input)) => {
                self.handle_extract_pages(&payload.session_id, input, &payload.user_email, manager)
                    .await
            }
            (JobType::Ocr, JobInput::Ocr(input)) => {
                self.handle_ocr(&payload.session_id, input, &payload.user_email, manager)
                    .await
            }
            _ => Err(JobError::Storage(crate::error::StorageError::Backend(
                "job_type and input_data mismatch".to_string(),
            ))),
        }
    }

    async fn handle_extract_pages(
        &self,
        session_id: &str,
        input: &ExtractPagesInput,
        user_email: &str,
        manager: &Arc<JobManager>,
    ) -> Result<(), JobError> {
        let source = self
            .storage
            .get(&input.filename, Some(session_id))
            .await?;

        let work_dir = tempfile::tempdir()
            .map_err(|e| JobError::Storage(crate::error::StorageError::Backend(e.to_string())))?;
        let pdf_path = work_dir.path().join(&input.filename);
        tokio::fs::write(&pdf_path, &source)
            .await
            .map_err(|e| JobError::Storage(crate::error::StorageError::Backend(e.to_string())))?;

        let total_pages = render::page_count(&pdf_path)?;
        let end_page = (input.start_page + EXTRACT_PAGES_BATCH - 1).min(total_pages);
        let batch_size = end_page - input.start_page + 1;

        let batches = render::render_pages(
            pdf_path,
            work_dir.path().to_path_buf(),
            input.start_page,
            end_page,
            EXTRACT_DPI,
        )
        .await?;

        for (i, page) in (input.start_page..=end_page).enumerate() {
            let rendered = batches
                .iter()
                .find(|b| b.covers(page))
                .and_then(|b| b.find_page(page));

            let Some(rendered_path) = rendered else {
                warn!(session_id, page, "rendered page file not found");
                continue;
            };

            let bytes = tokio::fs::read(&rendered_path)
                .await
                .map_err(|e| JobError::Storage(crate::error::StorageError::Backend(e.to_string())))?;

            self.storage
                .save(&bytes, &format!("pages/page_{page:03}.png"), Some(session_id))
                .await?;

            let progress = 50 + ((50 * (i as u32 + 1)) as f64 / batch_size as f64).round() as u32;
            debug!(session_id, page, progress, "page extracted");
        }

        if end_page < total_pages {
            self.sessions.rebuild_status(session_id, None).await?;
            manager
                .create_job(
                    session_id,
                    JobType::ExtractPages,
                    JobInput::ExtractPages(ExtractPagesInput {
                        filename: input.filename.clone(),
                        start_page: end_page + 1,
                    }),
                    user_email,
                )
                .await?;
        } else {
            self.sessions
                .rebuild_status(session_id, Some(total_pages))
                .await?;
        }

        Ok(())
    }

    async fn handle_ocr(
        &self,
        session_id: &str,
        input: &OcrInput,
        user_email: &str,
        manager: &Arc<JobManager>,
    ) -> Result<(), JobError> {
        let end_page = (input.start_page + OCR_BATCH - 1).min(input.total_pages);

        let mut pages = Vec::new();
        let mut images = Vec::new();
        for page in input.start_page..=end_page {
            match self
                .storage
                .get(&format!("pages/page_{page:03}.png"), Some(session_id))
                .await
            {
                Ok(bytes) => {
                    pages.push(page);
                    images.push(bytes);
                }
                Err(e) => {
                    warn!(session_id, page, error = %e, "page image missing at OCR time, skipping");
                }
            }
        }

        if images.is_empty() {
            self.sessions
                .rebuild_status(session_id, Some(input.total_pages))
                .await?;
            return Ok(());
        }

        let results = self.ocr.run_batch(&images, session_id).await?;

        for (page, result) in pages.iter().zip(results.iter()) {
            self.storage
                .save(
                    result.text.as_bytes(),
                    &format!("results/page_{page:03}.txt"),
                    Some(session_id),
                )
                .await?;
            debug!(session_id, page, "page OCR'd");
        }

        self.sessions
            .rebuild_status(session_id, Some(input.total_pages))
            .await?;

        if end_page < input.total_pages {
            manager
                .create_job(
                    session_id,
                    JobType::Ocr,
                    JobInput::Ocr(OcrInput {
                        total_pages: input.total_pages,
                        start_page: end_page + 1,
                    }),
                    user_email,
                )
                .await?;
        }

        Ok(())
    }
}
