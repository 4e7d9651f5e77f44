//! Per-job handle on the record store used by every writer of one job.

use std::sync::Arc;

use fuzzdeck_storage::{fields, Document, JobStatus, JobStore, LogLine, RecordPatch};
use tracing::warn;

use crate::error::Result;

#[derive(Clone)]
pub struct JobRecorder {
    store: Arc<dyn JobStore>,
    collection: String,
    job_id: String,
    max_log_lines: usize,
}

impl JobRecorder {
    pub fn new(
        store: Arc<dyn JobStore>,
        collection: impl Into<String>,
        job_id: impl Into<String>,
        max_log_lines: usize,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            job_id: job_id.into(),
            max_log_lines,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn max_log_lines(&self) -> usize {
        self.max_log_lines
    }

    pub async fn apply(&self, patch: RecordPatch) -> Result<Document> {
        Ok(self
            .store
            .merge_update(&self.collection, &self.job_id, patch)
            .await?)
    }

    /// Status currently stored for the job
    pub async fn status(&self) -> Result<Option<JobStatus>> {
        let doc = self.store.get(&self.collection, &self.job_id).await?;
        Ok(doc.as_ref().and_then(status_of))
    }

    /// Background write: failures are logged, the next write retries
    pub async fn apply_or_warn(&self, patch: RecordPatch, what: &str) {
        if patch.is_empty() {
            return;
        }
        if let Err(e) = self.apply(patch).await {
            warn!(job_id = %self.job_id, error = %e, "Failed to write {}", what);
        }
    }

    /// Patch appending lines to `logs` within the configured cap
    pub fn log_patch(&self, lines: Vec<LogLine>) -> RecordPatch {
        RecordPatch::new().append_logs(lines, self.max_log_lines)
    }

    pub async fn log(&self, line: LogLine) {
        self.apply_or_warn(self.log_patch(vec![line]), "log line").await
    }
}

pub(crate) fn status_of(doc: &Document) -> Option<JobStatus> {
    doc.get(fields::STATUS)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

impl std::fmt::Debug for JobRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRecorder")
            .field("collection", &self.collection)
            .field("job_id", &self.job_id)
            .finish()
    }
}
