mod artifacts;
mod events;
mod jobs;

use axum::Json;
use serde::Serialize;

pub use artifacts::{artifacts_handler, ArtifactQuery};
pub use events::{events_handler, RECORD_EVENT};
pub use jobs::{job_handler, stop_handler, submit_handler, JobQuery};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
