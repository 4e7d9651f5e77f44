//! radamsa adapter: N mutated copies of an uploaded sample.

use std::sync::Arc;

use async_trait::async_trait;
use fuzzdeck_storage::{fields, sanitize_filename, ArtifactRefs, ArtifactStore, RecordPatch};
use regex::Regex;
use serde_json::{json, Map, Value};

use super::afl::into_map;
use super::{check_upload, FinalContext, PrepareContext, PreparedJob, ToolMonitor};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::submission::{Submission, UploadedFile};
use crate::supervisor::LaunchSpec;

pub const MAX_ITERATIONS: u32 = 10_000;

#[derive(Debug)]
pub struct RadamsaParams {
    file: UploadedFile,
    iterations: u32,
    seed: Option<u64>,
}

impl RadamsaParams {
    pub fn validate(mut submission: Submission, config: &OrchestratorConfig) -> Result<Self> {
        let file = submission
            .take_file("file")
            .ok_or_else(|| OrchestratorError::validation("Missing uploaded file"))?;
        check_upload(&file, config)?;

        let iterations = submission.parse_or::<u32>("iterations", 1)?;
        if !(1..=MAX_ITERATIONS).contains(&iterations) {
            return Err(OrchestratorError::validation(format!(
                "iterations must be between 1 and {}",
                MAX_ITERATIONS
            )));
        }

        Ok(Self {
            file,
            iterations,
            seed: submission.parse_opt("seed")?,
        })
    }

    pub fn prepare(self, ctx: &PrepareContext<'_>) -> Result<PreparedJob> {
        let (stored, artifacts) = ctx.store_input(&self.file)?;
        let name = sanitize_filename(&self.file.filename)?;
        let template = ctx
            .paths
            .output_dir
            .join(format!("{}_%n_{}", ctx.job_id, name));

        let mut launch = LaunchSpec::new(&ctx.config.binaries.radamsa);
        if let Some(seed) = self.seed {
            launch = launch.arg("-s").arg(seed.to_string());
        }
        launch = launch.args([
            "-n".to_string(),
            self.iterations.to_string(),
            "-o".to_string(),
            template.display().to_string(),
            stored.path.display().to_string(),
        ]);

        Ok(PreparedJob {
            parameters: into_map(json!({
                "originalFile": self.file.filename,
                "iterations": self.iterations,
                "seed": self.seed,
            })),
            build: None,
            launch,
            monitor: Arc::new(RadamsaMonitor {
                artifacts: ctx.artifacts.clone(),
                job_id: ctx.job_id.to_string(),
                refs: artifacts.clone(),
            }),
            artifacts,
        })
    }
}

/// Matches the files radamsa writes for `job_id`
pub fn output_pattern(job_id: &str) -> Result<Regex> {
    Regex::new(&format!(r"^{}_\d+_", regex::escape(job_id))).map_err(OrchestratorError::parse)
}

struct RadamsaMonitor {
    artifacts: ArtifactStore,
    job_id: String,
    refs: ArtifactRefs,
}

#[async_trait]
impl ToolMonitor for RadamsaMonitor {
    async fn finalize(&self, _ctx: &FinalContext) -> Result<RecordPatch> {
        let pattern = output_pattern(&self.job_id)?;
        let store = self.artifacts.clone();
        let job_id = self.job_id.clone();
        let files = tokio::task::spawn_blocking(move || store.list_outputs(&job_id, ".", Some(&pattern)))
            .await
            .map_err(|e| OrchestratorError::Other(e.into()))??;

        let refs = ArtifactRefs {
            file_count: files.len() as u64,
            files: files.clone(),
            ..self.refs.clone()
        };
        let mut stats = Map::new();
        stats.insert("mutatedFiles".to_string(), json!(files.len()));

        Ok(RecordPatch::new()
            .stats(stats)
            .set_serialized(fields::ARTIFACTS, &refs)
            .set(
                fields::RESULTS,
                Value::Array(files.into_iter().map(Value::String).collect()),
            ))
    }
}
