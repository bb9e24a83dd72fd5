//! Dispatch API: the thin HTTP/JSON boundary over the core components (spec §6).

mod handlers;
mod routes;

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::job::JobManager;
use crate::ocr::OcrWorker;

pub use routes::create_router;

/// Process-lifetime value shared by every request handler and the local job
/// pool. Owns no per-user state directly — Storage Gateways are built
/// per-request, scoped to the caller's identity (spec §9 "Global state →
/// explicit parameters").
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub job_manager: Arc<JobManager>,
    pub ocr: Arc<OcrWorker>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let ocr = OcrWorker::new(&config);
        let job_manager = Arc::new(JobManager::new(Arc::clone(&config), Arc::clone(&ocr)));
        Self {
            config,
            job_manager,
            ocr,
        }
    }
}

pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = config.bind_address.clone();
    let state = AppState::new(config);
    let router = create_router(state);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr, "dispatch API listening");
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_config(data_dir: std::path::PathBuf) -> Config {
        Config {
            mode: Mode::Local,
            data_dir,
            bucket_name: None,
            worker_url: None,
            model_name: "test".into(),
            device: "cpu".into(),
            max_file_size_bytes: 500 * 1024 * 1024,
            allowed_extensions: vec!["pdf".into(), "png".into()],
            bind_address: "127.0.0.1:0".into(),
        }
    }

    fn setup_test_app() -> (tempfile::TempDir, axum::Router) {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(test_config(dir.path().to_path_buf()));
        (dir, create_router(state))
    }

    #[tokio::test]
    async fn status_for_unknown_session_is_404() {
        let (_dir, app) = setup_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/sessions/does-not-exist/status")
                    .header("X-User-Email", "user@example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_start_rejects_file_over_the_size_limit() {
        let (_dir, app) = setup_test_app();
        let body = serde_json::json!({
            "filename": "doc.pdf",
            "total_size": 500 * 1024 * 1024 + 1,
            "total_chunks": 1,
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/uploads")
                    .header("content-type", "application/json")
                    .header("X-User-Email", "user@example.com")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_then_status_round_trip_through_the_http_api() {
        let (_dir, app) = setup_test_app();

        let start_body = serde_json::json!({
            "filename": "doc.pdf",
            "total_size": 4,
            "total_chunks": 1,
        });
        let start_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/uploads")
                    .header("content-type", "application/json")
                    .header("X-User-Email", "user@example.com")
                    .body(Body::from(serde_json::to_vec(&start_body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(start_response.status(), StatusCode::OK);
        let start_body = axum::body::to_bytes(start_response.into_body(), usize::MAX)
            .await
            .unwrap();
        let start_json: serde_json::Value = serde_json::from_slice(&start_body).unwrap();
        let upload_id = start_json["upload_id"].as_str().unwrap().to_string();
        let session_id = start_json["session_id"].as_str().unwrap().to_string();

        let chunk_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/uploads/{upload_id}/chunks"))
                    .header("X-User-Email", "user@example.com")
                    .header("X-Chunk-Number", "0")
                    .body(Body::from(&b"data"[..]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(chunk_response.status(), StatusCode::OK);

        let assemble_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/uploads/{upload_id}/assemble"))
                    .header("X-User-Email", "user@example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(assemble_response.status(), StatusCode::OK);
        let assemble_body = axum::body::to_bytes(assemble_response.into_body(), usize::MAX)
            .await
            .unwrap();
        let assemble_json: serde_json::Value = serde_json::from_slice(&assemble_body).unwrap();
        assert_eq!(assemble_json["status"], "complete");
        assert_eq!(assemble_json["session_id"], session_id);

        // the session created at upload-start is now reachable for status calls,
        // closing the loop the client needs to drive create_job/get_status.
        let rebuild_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/sessions/{session_id}/status/rebuild"))
                    .header("X-User-Email", "user@example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rebuild_response.status(), StatusCode::OK);

        let status_response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/sessions/{session_id}/status"))
                    .header("X-User-Email", "user@example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(status_response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn serve_file_rejects_mismatched_user_hash_in_path() {
        let (_dir, app) = setup_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/storage/not-the-callers-hash/some-session/doc.pdf")
                    .header("X-User-Email", "user@example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn upload_start_rejects_disallowed_extension() {
        let (_dir, app) = setup_test_app();
        let body = serde_json::json!({
            "filename": "malware.exe",
            "total_size": 10,
            "total_chunks": 1,
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/uploads")
                    .header("content-type", "application/json")
                    .header("X-User-Email", "user@example.com")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
