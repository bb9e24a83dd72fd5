//! Typed error taxonomy for the pipeline, mapped onto HTTP at the Dispatch API boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors from the Storage Gateway (`storage::StorageGateway`).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("refused to form a key outside the caller's user prefix")]
    CrossUser,
}

/// Errors from the Upload Assembler (`upload::UploadAssembler`).
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload session not found: {0}")]
    NotFound(String),
    #[error("chunk write exceeded the 30s deadline")]
    Timeout,
    #[error("assemble requested with missing chunks")]
    Incomplete { missing_chunks: Vec<u32> },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Errors from the Job Manager / Job Processor.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("remote dispatch failed: {0}")]
    DispatchFailure(String),
    #[error(transparent)]
    Ocr(#[from] OcrError),
}

/// Errors from the OCR Worker.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("model not ready after 300s wait")]
    ModelNotReady,
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Errors surfaced to the caller at the validation boundary (§7 `ValidationError`).
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unsupported file extension: {0}")]
    UnsupportedExtension(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("chunk_number {0} out of range [0, {1})")]
    ChunkOutOfRange(u32, u32),
    #[error("unsupported job type: {0}")]
    UnsupportedJobType(String),
    #[error("file size {0} bytes exceeds maximum {1} bytes")]
    FileTooLarge(u64, u64),
}

/// Unified error type returned by Dispatch API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Ocr(#[from] OcrError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Storage(StorageError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Storage(StorageError::CrossUser) => {
                (StatusCode::FORBIDDEN, self.to_string())
            }
            ApiError::Storage(StorageError::Backend(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            ApiError::Upload(UploadError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Upload(UploadError::Timeout) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ApiError::Upload(UploadError::Incomplete { .. }) => {
                // Callers of assemble() handle Incomplete as a normal 200 response;
                // this branch only fires if it escapes as an error elsewhere.
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::Upload(UploadError::Storage(StorageError::NotFound(_))) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Upload(UploadError::Storage(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            ApiError::Upload(UploadError::Validation(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::Job(JobError::SessionNotFound(_)) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Job(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            ApiError::Ocr(OcrError::ModelNotReady) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ApiError::Ocr(OcrError::Inference(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
