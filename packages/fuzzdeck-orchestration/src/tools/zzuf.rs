//! zzuf adapter: one fuzzed copy of an uploaded file, zzuf running as a
//! stdin/stdout filter under `timeout`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use fuzzdeck_storage::{sanitize_filename, RecordPatch};
use serde::Serialize;
use serde_json::json;

use super::afl::into_map;
use super::{check_upload, FinalContext, PrepareContext, PreparedJob, ToolMonitor};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::submission::{Submission, UploadedFile};
use crate::supervisor::LaunchSpec;

pub const DEFAULT_RATIO: f64 = 0.4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug)]
pub struct ZzufParams {
    file: UploadedFile,
    ratio: f64,
    seed: u64,
    timeout_secs: u64,
}

fn random_seed() -> u64 {
    uuid::Uuid::new_v4().as_u128() as u32 as u64
}

impl ZzufParams {
    pub fn validate(mut submission: Submission, config: &OrchestratorConfig) -> Result<Self> {
        let file = submission
            .take_file("file")
            .ok_or_else(|| OrchestratorError::validation("No file uploaded"))?;
        check_upload(&file, config)?;

        let ratio = submission.parse_or("ratio", DEFAULT_RATIO)?;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(OrchestratorError::validation("ratio must be between 0 and 1"));
        }
        let timeout_secs = submission.parse_or("timeout", DEFAULT_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(OrchestratorError::validation("timeout must be at least 1 second"));
        }

        Ok(Self {
            file,
            ratio,
            seed: submission.parse_opt("seed")?.unwrap_or_else(random_seed),
            timeout_secs,
        })
    }

    pub fn prepare(self, ctx: &PrepareContext<'_>) -> Result<PreparedJob> {
        let (stored, mut artifacts) = ctx.store_input(&self.file)?;
        let fuzzed_name = fuzzed_file_name(ctx.job_id, &sanitize_filename(&self.file.filename)?);
        let output = ctx.paths.output_dir.join(&fuzzed_name);
        artifacts.files = vec![fuzzed_name];
        artifacts.file_count = 1;

        let bins = &ctx.config.binaries;
        let launch = LaunchSpec::new(&bins.zzuf)
            .args([
                "-s".to_string(),
                self.seed.to_string(),
                "-r".to_string(),
                self.ratio.to_string(),
            ])
            .stdin_file(&stored.path)
            .stdout_file(&output)
            .within_timeout(&bins.timeout, format!("{}s", self.timeout_secs));

        Ok(PreparedJob {
            parameters: into_map(json!({
                "originalFileName": self.file.filename,
                "ratio": self.ratio,
                "seed": self.seed,
                "timeout": self.timeout_secs,
            })),
            artifacts,
            build: None,
            launch,
            monitor: Arc::new(ZzufMonitor {
                input: stored.path,
                output,
                ratio: self.ratio,
                seed: self.seed,
            }),
        })
    }
}

pub fn fuzzed_file_name(job_id: &str, original: &str) -> String {
    format!("{}_fuzzed_{}", job_id, original)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZzufStats {
    pub original_size: u64,
    pub fuzzed_size: u64,
    /// Seconds
    pub execution_time: f64,
    pub ratio: f64,
    pub seed: u64,
}

struct ZzufMonitor {
    input: PathBuf,
    output: PathBuf,
    ratio: f64,
    seed: u64,
}

async fn file_size(path: &std::path::Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

#[async_trait]
impl ToolMonitor for ZzufMonitor {
    async fn finalize(&self, ctx: &FinalContext) -> Result<RecordPatch> {
        let stats = ZzufStats {
            original_size: file_size(&self.input).await,
            fuzzed_size: file_size(&self.output).await,
            execution_time: ctx.elapsed.as_secs_f64(),
            ratio: self.ratio,
            seed: self.seed,
        };
        let stats = serde_json::to_value(&stats).map_err(OrchestratorError::parse)?;
        Ok(RecordPatch::new().stats(into_map(stats)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::{ExitInfo, OutputTarget};
    use fuzzdeck_storage::{ArtifactStore, Document};
    use std::time::Duration;

    fn with_file() -> Submission {
        Submission::new().with_file("file", "img.png", vec![1u8, 2, 3, 4])
    }

    #[test]
    fn test_validation() {
        let config = OrchestratorConfig::default();
        let err = ZzufParams::validate(Submission::new(), &config).unwrap_err();
        assert!(err.to_string().contains("No file uploaded"));

        assert!(ZzufParams::validate(with_file().with_field("ratio", "1.5"), &config).is_err());
        assert!(ZzufParams::validate(with_file().with_field("timeout", "0"), &config).is_err());

        let small = OrchestratorConfig {
            max_upload_bytes: 2,
            ..Default::default()
        };
        let err = ZzufParams::validate(with_file(), &small).unwrap_err();
        assert!(err.to_string().contains("File size exceeds"));

        let params = ZzufParams::validate(with_file(), &config).unwrap();
        assert_eq!(params.ratio, DEFAULT_RATIO);
        assert_eq!(params.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(params.seed <= u32::MAX as u64);
    }

    #[tokio::test]
    async fn test_prepare_and_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig::default();
        let store = ArtifactStore::new(dir.path());
        let paths = store.allocate("zzuf_1").unwrap();
        let ctx = PrepareContext {
            job_id: "zzuf_1",
            paths: &paths,
            artifacts: &store,
            config: &config,
        };
        let prepared = ZzufParams::validate(with_file().with_field("seed", "99"), &config)
            .unwrap()
            .prepare(&ctx)
            .unwrap();

        let launch = &prepared.launch;
        assert_eq!(launch.program, "timeout");
        assert_eq!(&launch.args[..6], ["30s", "zzuf", "-s", "99", "-r", "0.4"]);
        assert!(launch.timeout_wrapped);
        let OutputTarget::File(output) = &launch.stdout else {
            panic!("stdout should go to the fuzzed file");
        };
        assert!(output.ends_with("zzuf_1_fuzzed_img.png"));
        assert_eq!(prepared.artifacts.files, vec!["zzuf_1_fuzzed_img.png"]);

        std::fs::write(output, [9u8; 6]).unwrap();
        let patch = prepared
            .monitor
            .finalize(&FinalContext {
                exit: ExitInfo::default(),
                elapsed: Duration::from_millis(1500),
            })
            .await
            .unwrap();
        let mut doc = Document::new();
        patch.apply(&mut doc);
        assert_eq!(doc["stats"]["originalSize"], 4);
        assert_eq!(doc["stats"]["fuzzedSize"], 6);
        assert_eq!(doc["stats"]["executionTime"], 1.5);
        assert_eq!(doc["stats"]["seed"], 99);
    }
}
