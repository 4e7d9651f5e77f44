use axum::extract::rejection::QueryRejection;
use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::Json;
use fuzzdeck_orchestration::{StopOutcome, SubmitOutcome, Submission, Tool, UploadedFile};
use fuzzdeck_storage::JobRecord;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct JobQuery {
    #[serde(rename = "jobId")]
    pub job_id: Option<String>,
}

impl JobQuery {
    pub fn require_job_id(self) -> ApiResult<String> {
        self.job_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ApiError::bad_request("jobId is required"))
    }
}

/// `POST /api/fuzz/{tool}`: multipart for upload tools, JSON otherwise
#[tracing::instrument(skip(state, request))]
pub async fn submit_handler(
    State(state): State<AppState>,
    Path(tool): Path<String>,
    request: Request,
) -> ApiResult<Json<SubmitOutcome>> {
    let tool = Tool::from_str(&tool)?;
    let submission = if tool.takes_upload() {
        let multipart = Multipart::from_request(request, &state).await?;
        read_multipart(multipart).await?
    } else {
        let Json(body) = Json::<Value>::from_request(request, &state).await?;
        Submission::from_json(&body)?
    };

    let outcome = state.coordinator.submit(tool, submission).await?;
    Ok(Json(outcome))
}

async fn read_multipart(mut multipart: Multipart) -> ApiResult<Submission> {
    let mut submission = Submission::new();
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match field.file_name().map(str::to_string) {
            Some(filename) => {
                let bytes = field.bytes().await?;
                tracing::debug!(field = %name, filename = %filename, size = bytes.len(), "Received upload");
                submission.insert_file(name, UploadedFile::new(filename, bytes.to_vec()));
            }
            None => {
                let text = field.text().await?;
                submission.insert_field(name, text);
            }
        }
    }
    Ok(submission)
}

/// `DELETE /api/fuzz/{tool}?jobId=`
#[tracing::instrument(skip(state))]
pub async fn stop_handler(
    State(state): State<AppState>,
    Path(tool): Path<String>,
    query: Result<Query<JobQuery>, QueryRejection>,
) -> ApiResult<Json<StopOutcome>> {
    let tool = Tool::from_str(&tool)?;
    let Query(query) = query?;
    let job_id = query.require_job_id()?;
    let outcome = state.coordinator.stop(tool, &job_id).await?;
    Ok(Json(outcome))
}

/// `GET /api/fuzz/{tool}/jobs/{job_id}`
#[tracing::instrument(skip(state))]
pub async fn job_handler(
    State(state): State<AppState>,
    Path((tool, job_id)): Path<(String, String)>,
) -> ApiResult<Json<JobRecord>> {
    let tool = Tool::from_str(&tool)?;
    Ok(Json(state.coordinator.get(tool, &job_id).await?))
}
