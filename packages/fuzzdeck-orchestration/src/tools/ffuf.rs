//! ffuf adapter: content discovery against a `FUZZ` URL template.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use fuzzdeck_storage::{fields, RecordPatch};
use serde::Serialize;
use serde_json::{json, Value};

use super::afl::into_map;
use super::{read_optional, FinalContext, PrepareContext, PreparedJob, ToolMonitor};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::submission::Submission;
use crate::supervisor::LaunchSpec;

pub const FUZZ_KEYWORD: &str = "FUZZ";

#[derive(Debug)]
pub struct FfufParams {
    target: String,
    wordlist: PathBuf,
}

impl FfufParams {
    pub fn validate(submission: Submission, config: &OrchestratorConfig) -> Result<Self> {
        let target = submission
            .field("target")
            .filter(|t| t.contains(FUZZ_KEYWORD))
            .ok_or_else(|| OrchestratorError::validation("Target must include FUZZ"))?;
        Ok(Self {
            target: target.to_string(),
            wordlist: config.wordlist_path(&config.default_wordlist),
        })
    }

    pub fn prepare(self, ctx: &PrepareContext<'_>) -> Result<PreparedJob> {
        let output = results_path(ctx);
        let launch = LaunchSpec::new(&ctx.config.binaries.ffuf).args([
            "-u".to_string(),
            self.target.clone(),
            "-w".to_string(),
            self.wordlist.display().to_string(),
            "-of".to_string(),
            "json".to_string(),
            "-o".to_string(),
            output.display().to_string(),
        ]);

        let mut artifacts = ctx.base_refs();
        artifacts.files = vec![file_name(ctx.job_id)];

        Ok(PreparedJob {
            parameters: into_map(json!({
                "target": self.target,
                "wordlist": self.wordlist.display().to_string(),
                "command": launch.command_line(),
            })),
            artifacts,
            build: None,
            launch,
            monitor: Arc::new(FfufMonitor { output }),
        })
    }
}

/// Raw output file name, relative to the job's output directory
pub fn file_name(job_id: &str) -> String {
    format!("{}_results.json", job_id)
}

fn results_path(ctx: &PrepareContext<'_>) -> PathBuf {
    ctx.paths.output_dir.join(file_name(ctx.job_id))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfufSummary {
    pub total_results: usize,
    #[serde(rename = "firstURL")]
    pub first_url: Option<String>,
    pub duration: Option<Value>,
}

impl FfufSummary {
    pub fn from_results(results: &[Value]) -> Self {
        let first = results.first();
        Self {
            total_results: results.len(),
            first_url: first
                .and_then(|r| r.get("url"))
                .and_then(Value::as_str)
                .filter(|u| !u.is_empty())
                .map(str::to_string),
            duration: first
                .and_then(|r| r.get("duration"))
                .filter(|d| !d.is_null())
                .cloned(),
        }
    }
}

struct FfufMonitor {
    output: PathBuf,
}

#[async_trait]
impl ToolMonitor for FfufMonitor {
    async fn finalize(&self, _ctx: &FinalContext) -> Result<RecordPatch> {
        let Some(raw) = read_optional(&self.output).await? else {
            return Ok(RecordPatch::new());
        };
        let parsed: Value = serde_json::from_str(&raw)
            .map_err(|e| OrchestratorError::parse(format!("ffuf output: {}", e)))?;
        let results = match parsed.get("results") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        let summary = FfufSummary::from_results(&results);

        Ok(RecordPatch::new()
            .stats(into_map(
                serde_json::to_value(&summary).map_err(OrchestratorError::parse)?,
            ))
            .set(fields::RESULTS, Value::Array(results)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::ExitInfo;
    use fuzzdeck_storage::{ArtifactStore, Document};
    use std::time::Duration;

    fn ctx_final() -> FinalContext {
        FinalContext {
            exit: ExitInfo::default(),
            elapsed: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_target_requires_fuzz() {
        let config = OrchestratorConfig::default();
        let err = FfufParams::validate(Submission::new().with_field("target", "http://x/"), &config)
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("Target must include FUZZ"));
        assert!(FfufParams::validate(Submission::new(), &config).is_err());
    }

    #[test]
    fn test_prepare_uses_default_wordlist() {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig {
            wordlist_dir: dir.path().join("wl"),
            ..Default::default()
        };
        let store = ArtifactStore::new(dir.path());
        let paths = store.allocate("ffuf_1").unwrap();
        let ctx = PrepareContext {
            job_id: "ffuf_1",
            paths: &paths,
            artifacts: &store,
            config: &config,
        };
        let prepared = FfufParams::validate(
            Submission::new().with_field("target", "http://x/FUZZ"),
            &config,
        )
        .unwrap()
        .prepare(&ctx)
        .unwrap();

        let args = &prepared.launch.args;
        assert_eq!(prepared.launch.program, "ffuf");
        assert_eq!(args[1], "http://x/FUZZ");
        assert!(args[3].ends_with("common.txt"));
        assert!(args[7].ends_with("ffuf_1_results.json"));
        assert!(prepared.build.is_none());
    }

    #[test]
    fn test_summary_from_results() {
        let results = vec![json!({"url": "http://x/admin", "duration": 1200}), json!({})];
        let summary = FfufSummary::from_results(&results);
        assert_eq!(summary.total_results, 2);
        assert_eq!(summary.first_url.as_deref(), Some("http://x/admin"));
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["firstURL"], "http://x/admin");
        assert_eq!(value["totalResults"], 2);

        let empty = serde_json::to_value(FfufSummary::from_results(&[])).unwrap();
        assert!(empty["firstURL"].is_null());
        assert!(empty["duration"].is_null());
    }

    #[tokio::test]
    async fn test_finalize_reads_results() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.json");
        std::fs::write(&output, r#"{"results":[{"url":"http://x/a","duration":5}]}"#).unwrap();
        let patch = FfufMonitor { output }.finalize(&ctx_final()).await.unwrap();
        let mut doc = Document::new();
        patch.apply(&mut doc);
        assert_eq!(doc["stats"]["totalResults"], 1);
        assert_eq!(doc["results"][0]["url"], "http://x/a");
    }

    #[tokio::test]
    async fn test_finalize_missing_output_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = FfufMonitor {
            output: dir.path().join("missing.json"),
        };
        assert!(monitor.finalize(&ctx_final()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finalize_malformed_output_errors() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.json");
        std::fs::write(&output, "not json").unwrap();
        assert!(FfufMonitor { output }.finalize(&ctx_final()).await.is_err());
    }
}
