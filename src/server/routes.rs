//! Router wiring for the Dispatch API endpoints (spec §6).

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/uploads", post(handlers::start_upload))
        .route("/uploads/:upload_id/chunks", put(handlers::upload_chunk))
        .route("/uploads/:upload_id/assemble", post(handlers::assemble_upload))
        .route("/jobs", post(handlers::create_job))
        .route("/sessions/:session_id/status", get(handlers::get_status))
        .route(
            "/sessions/:session_id/status/rebuild",
            post(handlers::rebuild_status),
        )
        .route(
            "/storage/:user_hash/:session_id/:filename",
            get(handlers::serve_file),
        )
        .route("/worker/process-job", post(handlers::worker_callback))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
