//! dalfox adapter: XSS scan of a single URL.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use fuzzdeck_storage::{fields, RecordPatch};
use serde_json::{json, Map, Value};

use super::afl::into_map;
use super::{read_optional, FinalContext, PrepareContext, PreparedJob, ToolMonitor};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::submission::Submission;
use crate::supervisor::LaunchSpec;

#[derive(Debug)]
pub struct DalfoxParams {
    target: String,
}

impl DalfoxParams {
    pub fn validate(submission: Submission, _config: &OrchestratorConfig) -> Result<Self> {
        let target = submission
            .field("target")
            .filter(|t| t.starts_with("http"))
            .ok_or_else(|| OrchestratorError::validation("Missing or invalid target URL"))?;
        Ok(Self {
            target: target.to_string(),
        })
    }

    pub fn prepare(self, ctx: &PrepareContext<'_>) -> Result<PreparedJob> {
        let output = ctx.paths.output_dir.join(file_name(ctx.job_id));
        let launch = LaunchSpec::new(&ctx.config.binaries.dalfox).args([
            "url".to_string(),
            self.target.clone(),
            "--format".to_string(),
            "json".to_string(),
            "-o".to_string(),
            output.display().to_string(),
        ]);

        let mut artifacts = ctx.base_refs();
        artifacts.files = vec![file_name(ctx.job_id)];

        Ok(PreparedJob {
            parameters: into_map(json!({
                "target": self.target,
                "command": launch.command_line(),
            })),
            artifacts,
            build: None,
            launch,
            monitor: Arc::new(DalfoxMonitor { output }),
        })
    }
}

pub fn file_name(job_id: &str) -> String {
    format!("{}_results.json", job_id)
}

/// Findings from dalfox's output file, written either as one JSON document
/// or as JSON lines depending on version.
pub fn parse_findings(raw: &str) -> Result<Vec<Value>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let values = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => vec![value],
        Err(whole) => trimmed
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(serde_json::from_str::<Value>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| OrchestratorError::parse(format!("dalfox output: {}", whole)))?,
    };

    Ok(values
        .into_iter()
        .flat_map(|value| match value {
            Value::Array(items) => items,
            other => vec![other],
        })
        .filter(is_finding)
        .collect())
}

fn is_finding(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty(),
        Value::Null => false,
        _ => true,
    }
}

struct DalfoxMonitor {
    output: PathBuf,
}

#[async_trait]
impl ToolMonitor for DalfoxMonitor {
    async fn finalize(&self, _ctx: &FinalContext) -> Result<RecordPatch> {
        let Some(raw) = read_optional(&self.output).await? else {
            return Ok(RecordPatch::new());
        };
        let findings = parse_findings(&raw)?;

        let mut stats = Map::new();
        stats.insert("findings".to_string(), json!(findings.len()));
        Ok(RecordPatch::new()
            .stats(stats)
            .set(fields::RESULTS, Value::Array(findings)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_must_be_http() {
        let config = OrchestratorConfig::default();
        let err = DalfoxParams::validate(Submission::new().with_field("target", "ftp://x"), &config)
            .unwrap_err();
        assert!(err.to_string().contains("Missing or invalid target URL"));
        assert!(DalfoxParams::validate(
            Submission::new().with_field("target", "https://x/?q=1"),
            &config
        )
        .is_ok());
    }

    #[test]
    fn test_parse_findings_json_array() {
        let raw = r#"[{"type":"V","data":"http://x/?q=<svg>"}, {}]"#;
        let findings = parse_findings(raw).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0]["type"], "V");
    }

    #[test]
    fn test_parse_findings_json_lines() {
        let raw = "{\"type\":\"R\"}\n\n{\"type\":\"V\"}\n{}\n";
        assert_eq!(parse_findings(raw).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_findings_empty_and_garbage() {
        assert!(parse_findings("  \n").unwrap().is_empty());
        assert!(parse_findings("[{}]").unwrap().is_empty());
        assert!(parse_findings("scan finished").is_err());
    }
}
