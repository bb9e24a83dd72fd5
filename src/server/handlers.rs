//! Dispatch API handlers: thin translation between HTTP/JSON and the core
//! components (spec §6).

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, StorageError, ValidationError};
use crate::job::{ExtractPagesInput, JobInput, JobType};
use crate::session::SessionStore;
use crate::storage::{StorageGateway, ANONYMOUS_EMAIL};
use crate::upload::{AssembleOutcome, ChunkOutcome, UploadAssembler};

use super::AppState;

fn caller_email(headers: &HeaderMap) -> String {
    headers
        .get("X-User-Email")
        .and_then(|v| v.to_str().ok())
        .unwrap_or(ANONYMOUS_EMAIL)
        .to_string()
}

fn gateway(state: &AppState, user_email: &str) -> Result<StorageGateway, ApiError> {
    StorageGateway::new(&state.config, user_email)
        .map_err(|e| ApiError::Storage(StorageError::Backend(e.to_string())))
}

#[derive(Deserialize)]
pub struct StartUploadRequest {
    filename: String,
    total_size: u64,
    total_chunks: u32,
}

#[derive(Serialize)]
pub struct StartUploadResponse {
    upload_id: String,
    session_id: String,
    total_chunks: u32,
}

pub async fn start_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StartUploadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ext = req
        .filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    if !state.config.is_extension_allowed(&ext) {
        return Err(ApiError::Validation(ValidationError::UnsupportedExtension(ext)));
    }
    if req.total_size > state.config.max_file_size_bytes {
        return Err(ApiError::Validation(ValidationError::FileTooLarge(
            req.total_size,
            state.config.max_file_size_bytes,
        )));
    }

    let user_email = caller_email(&headers);
    let storage = gateway(&state, &user_email)?;
    let sessions = SessionStore::new(storage.clone());
    let session_id = sessions.create_session(&user_email).await?;

    let assembler = UploadAssembler::new(storage);
    let upload_id = assembler
        .start(
            req.filename,
            req.total_size,
            req.total_chunks,
            &user_email,
            session_id.clone(),
        )
        .await?;

    Ok(Json(StartUploadResponse {
        upload_id,
        session_id,
        total_chunks: req.total_chunks,
    }))
}

#[derive(Serialize)]
pub struct UploadChunkResponse {
    status: &'static str,
}

pub async fn upload_chunk(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let chunk_number: u32 = headers
        .get("X-Chunk-Number")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or(ValidationError::MissingField("X-Chunk-Number"))?;

    let user_email = caller_email(&headers);
    let storage = gateway(&state, &user_email)?;
    let assembler = UploadAssembler::new(storage);

    let outcome = assembler.upload_chunk(&upload_id, chunk_number, &body).await?;

    let status = match outcome {
        ChunkOutcome::Received => "received",
        ChunkOutcome::Duplicate => "duplicate",
    };
    Ok(Json(UploadChunkResponse { status }))
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum AssembleResponse {
    Complete {
        status: &'static str,
        filename: String,
        session_id: String,
    },
    Incomplete { status: &'static str, missing_chunks: Vec<u32> },
}

pub async fn assemble_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_email = caller_email(&headers);
    let storage = gateway(&state, &user_email)?;
    let assembler = UploadAssembler::new(storage);

    let outcome = assembler.assemble(&upload_id).await?;
    Ok(Json(match outcome {
        AssembleOutcome::Complete { filename, session_id } => AssembleResponse::Complete {
            status: "complete",
            filename,
            session_id,
        },
        AssembleOutcome::Incomplete { missing_chunks } => AssembleResponse::Incomplete {
            status: "incomplete",
            missing_chunks,
        },
    }))
}

#[derive(Deserialize)]
pub struct CreateJobRequest {
    session_id: String,
    job_type: String,
    input_data: serde_json::Value,
}

#[derive(Serialize)]
pub struct CreateJobResponse {
    job_id: String,
    session_id: String,
}

pub async fn create_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_email = caller_email(&headers);

    let (job_type, input_data) = match req.job_type.as_str() {
        "extract_pages" => {
            let input: ExtractPagesInput = serde_json::from_value(req.input_data)
                .map_err(|_| ValidationError::MissingField("input_data"))?;
            (JobType::ExtractPages, JobInput::ExtractPages(input))
        }
        "ocr" => {
            let input = serde_json::from_value(req.input_data)
                .map_err(|_| ValidationError::MissingField("input_data"))?;
            (JobType::Ocr, JobInput::Ocr(input))
        }
        "slice_image" => {
            // Accepted at the boundary but has no processor state machine:
            // image-slicing is not part of the core.
            return Err(ApiError::Validation(ValidationError::UnsupportedJobType(
                req.job_type,
            )));
        }
        _ => return Err(ApiError::Validation(ValidationError::UnsupportedJobType(req.job_type))),
    };

    let job_id = state
        .job_manager
        .create_job(&req.session_id, job_type, input_data, &user_email)
        .await?;

    Ok(Json(CreateJobResponse {
        job_id,
        session_id: req.session_id,
    }))
}

pub async fn get_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_email = caller_email(&headers);
    let storage = gateway(&state, &user_email)?;
    let sessions = SessionStore::new(storage);

    match sessions.get_session_status(&session_id).await? {
        Some(doc) => Ok(Json(doc).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

pub async fn rebuild_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_email = caller_email(&headers);
    let storage = gateway(&state, &user_email)?;
    let sessions = SessionStore::new(storage);
    let doc = sessions.rebuild_status(&session_id, None).await?;
    Ok(Json(doc))
}

pub async fn serve_file(
    State(state): State<AppState>,
    Path((user_hash, session_id, filename)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_email = caller_email(&headers);
    let storage = gateway(&state, &user_email)?;
    if storage.user_hash() != user_hash {
        return Err(ApiError::Storage(StorageError::CrossUser));
    }
    let bytes = storage.get(&filename, Some(&session_id)).await?;

    let content_type = mime_guess::from_path(&filename)
        .first_or_octet_stream()
        .to_string();
    let cache_control = if filename.ends_with(".json") {
        "no-cache, max-age=0"
    } else {
        "public, max-age=3600"
    };

    Ok((
        [
            (axum::http::header::CONTENT_TYPE, content_type),
            (axum::http::header::CACHE_CONTROL, cache_control.to_string()),
        ],
        bytes,
    ))
}

#[derive(Serialize)]
pub struct WorkerCallbackResponse {
    status: &'static str,
}

/// Remote-mode worker callback: the external task queue POSTs the full job
/// payload here; a 5xx response tells it to retry (spec §4.4, §7).
pub async fn worker_callback(
    State(state): State<AppState>,
    Json(payload): Json<crate::job::JobPayload>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_email = payload.user_email.clone();
    let storage = StorageGateway::new(&state.config, &user_email)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let sessions = SessionStore::new(storage.clone());
    let processor = crate::job::JobProcessor::new(storage, sessions, state.ocr.clone());

    match processor.process_job(payload, &state.job_manager).await {
        Ok(()) => Ok(Json(WorkerCallbackResponse { status: "success" })),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
