//! Job Manager and Job Processor (spec §4.4, §4.5): bounded work units chained
//! by continuation jobs until a document is fully processed.

pub mod manager;
pub mod processor;
mod render;

use serde::{Deserialize, Serialize};

pub use manager::JobManager;
pub use processor::JobProcessor;

/// `EXTRACT_PAGES` and `OCR` are the only job types the core schedules; a third,
/// `slice_image`, is accepted at the Dispatch API boundary (spec §6's Create Job
/// table) but has no processor state machine — image-slicing is not part of the
/// core (spec §9 open questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ExtractPages,
    Ocr,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ExtractPages => "extract_pages",
            JobType::Ocr => "ocr",
        }
    }
}

/// EXTRACT_PAGES input: `{filename, start_page}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractPagesInput {
    pub filename: String,
    pub start_page: u32,
}

/// OCR input: `{total_pages, start_page}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrInput {
    pub total_pages: u32,
    pub start_page: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobInput {
    ExtractPages(ExtractPagesInput),
    Ocr(OcrInput),
}

/// A job carried end-to-end as a payload; the only durable trace beyond this is
/// the `{job_id, job_type, created_at}` entry appended to `metadata.json.jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub job_id: String,
    pub session_id: String,
    pub job_type: JobType,
    pub input_data: JobInput,
    pub user_email: String,
}

pub const EXTRACT_PAGES_BATCH: u32 = 10;
pub const OCR_BATCH: u32 = 5;
