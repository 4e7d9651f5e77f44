use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use fuzzdeck_orchestration::{ArtifactCategory, DownloadRequest, Tool};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ArtifactQuery {
    #[serde(rename = "jobId")]
    pub job_id: Option<String>,
    /// Category; the tool's default when absent
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub file: Option<String>,
}

/// `GET /api/fuzz/{tool}/artifacts?jobId=&type=&file=`
#[tracing::instrument(skip(state))]
pub async fn artifacts_handler(
    State(state): State<AppState>,
    Path(tool): Path<String>,
    query: Result<Query<ArtifactQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let tool = Tool::from_str(&tool)?;
    let Query(query) = query?;
    let job_id = query
        .job_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("jobId is required"))?;
    let category = match query.kind.as_deref() {
        Some(kind) => ArtifactCategory::from_str(kind)?,
        None => ArtifactCategory::default_for(tool),
    };

    let payload = state
        .coordinator
        .download(
            tool,
            &job_id,
            DownloadRequest {
                category,
                file: query.file,
            },
        )
        .await?;

    let disposition = HeaderValue::from_str(&payload.content_disposition())
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static(payload.content_type)),
        (header::CONTENT_DISPOSITION, disposition),
    ];
    Ok((headers, payload.bytes).into_response())
}
