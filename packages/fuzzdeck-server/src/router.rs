use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::handlers::{
    artifacts_handler, events_handler, health_handler, job_handler, stop_handler, submit_handler,
};
use crate::state::AppState;

/// Room for form fields and multipart framing around the uploads
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // AFL takes a source file and a seed
    let body_limit = (state.coordinator.config().max_upload_bytes as usize)
        .saturating_mul(2)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/fuzz/{tool}", post(submit_handler).delete(stop_handler))
        .route("/api/fuzz/{tool}/jobs/{job_id}", get(job_handler))
        .route("/api/fuzz/{tool}/jobs/{job_id}/events", get(events_handler))
        .route("/api/fuzz/{tool}/artifacts", get(artifacts_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}
