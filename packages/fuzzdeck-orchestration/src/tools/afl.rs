//! AFL++ adapter
//!
//! Build: instrumented compile of the uploaded C source.
//! Run: `afl-fuzz` as main instance `main`, optionally under `timeout <d>h`.
//! Progress: `fuzzer_stats` plus `crashes/` and `hangs/` listings of the
//! instance directory.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use fuzzdeck_storage::{fields, RecordPatch};
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::warn;

use super::{
    check_upload, read_optional, FinalContext, PrepareContext, PreparedJob, ToolMonitor,
};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::stats::{count_entries, parse_progress};
use crate::submission::{Submission, UploadedFile};
use crate::supervisor::LaunchSpec;

/// Instance name passed to `-M`
pub const INSTANCE: &str = "main";
pub const DEFAULT_SEED_NAME: &str = "default_seed";
pub const DEFAULT_SEED: &[u8] = b"initial seed";
const EXEC_TIMEOUT_MS: &str = "1000";

#[derive(Debug)]
pub struct AflParams {
    source: UploadedFile,
    seed: Option<UploadedFile>,
    duration_hours: u32,
    target_function: String,
    memory_limit: String,
    cpu_limit: u32,
}

fn identifier() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
}

fn memory_limit() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(none|[0-9]+[kMGT]?)$").ok())
        .as_ref()
}

fn matches(re: Option<&Regex>, value: &str) -> bool {
    re.map_or(false, |re| re.is_match(value))
}

impl AflParams {
    pub fn validate(mut submission: Submission, config: &OrchestratorConfig) -> Result<Self> {
        let source = submission
            .take_file("cfile")
            .ok_or_else(|| OrchestratorError::validation("C file is required"))?;
        check_upload(&source, config)?;
        let seed = submission.take_file("seed");
        if let Some(seed) = &seed {
            check_upload(seed, config)?;
        }

        let target_function = submission.field("targetFunction").unwrap_or("main").to_string();
        if !matches(identifier(), &target_function) {
            return Err(OrchestratorError::validation(format!(
                "Invalid targetFunction: {}",
                target_function
            )));
        }

        let mem_limit = submission.field("memoryLimit").unwrap_or("200").to_string();
        if !matches(memory_limit(), &mem_limit) {
            return Err(OrchestratorError::validation(format!(
                "Invalid memoryLimit: {}",
                mem_limit
            )));
        }

        Ok(Self {
            source,
            seed,
            duration_hours: submission.parse_or("duration", 0)?,
            target_function,
            memory_limit: mem_limit,
            cpu_limit: submission.parse_or("cpuLimit", 1)?,
        })
    }

    pub fn prepare(self, ctx: &PrepareContext<'_>) -> Result<PreparedJob> {
        let (stored, artifacts) = ctx.store_input(&self.source)?;
        let seed_name = match &self.seed {
            Some(seed) => {
                let path = ctx.artifacts.write_seed(ctx.job_id, &seed.filename, &seed.bytes)?;
                file_name(&path)
            }
            None => {
                ctx.artifacts
                    .write_seed(ctx.job_id, DEFAULT_SEED_NAME, DEFAULT_SEED)?;
                DEFAULT_SEED_NAME.to_string()
            }
        };

        let binary = ctx.paths.upload_dir.join(format!("{}_binary", ctx.job_id));
        let bins = &ctx.config.binaries;

        let build = LaunchSpec::new(&bins.afl_cc).args([
            "-fsanitize=address,undefined".to_string(),
            "-fno-omit-frame-pointer".to_string(),
            "-g".to_string(),
            stored.path.display().to_string(),
            "-o".to_string(),
            binary.display().to_string(),
            format!("-DFUZZ_TARGET={}", self.target_function),
        ]);

        let mut launch = LaunchSpec::new(&bins.afl_fuzz)
            .args([
                "-i".to_string(),
                ctx.paths.seed_dir().display().to_string(),
                "-o".to_string(),
                ctx.paths.output_dir.display().to_string(),
                "-m".to_string(),
                self.memory_limit.clone(),
                "-t".to_string(),
                EXEC_TIMEOUT_MS.to_string(),
                "-M".to_string(),
                INSTANCE.to_string(),
                "--".to_string(),
                binary.display().to_string(),
            ])
            .env("AFL_NO_UI", "0")
            .env("AFL_I_DONT_CARE_ABOUT_MISSING_CRASHES", "1")
            .env("AFL_SKIP_CPUFREQ", "1");
        if self.duration_hours > 0 {
            launch = launch.within_timeout(&bins.timeout, format!("{}h", self.duration_hours));
        }

        let parameters = json!({
            "duration": self.duration_hours,
            "targetFunction": self.target_function,
            "memoryLimit": self.memory_limit,
            "cpuLimit": self.cpu_limit,
            "uploadedCFile": self.source.filename,
            "uploadedSeedFile": seed_name,
        });

        Ok(PreparedJob {
            parameters: into_map(parameters),
            artifacts,
            build: Some(build),
            launch,
            monitor: Arc::new(AflMonitor::new(ctx.paths.output_dir.clone())),
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub(crate) fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Directory holding `fuzzer_stats`, `crashes/`, `hangs/` and `queue/`.
///
/// AFL++ nests everything under the instance name when run with `-M`; older
/// layouts write straight into the output directory.
pub fn instance_dir(output_dir: &Path) -> PathBuf {
    let nested = output_dir.join(INSTANCE);
    if nested.is_dir() {
        nested
    } else {
        output_dir.to_path_buf()
    }
}

/// One progress reading
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AflStats {
    pub stats: Map<String, Value>,
    pub crashes: u64,
    pub hangs: u64,
    pub execs_per_sec: f64,
}

impl AflStats {
    pub fn into_patch(self) -> RecordPatch {
        RecordPatch::new()
            .stats(self.stats)
            .set(fields::CRASHES, self.crashes)
            .set(fields::HANGS, self.hangs)
            .set(fields::EXECS_PER_SEC, self.execs_per_sec)
    }
}

pub struct AflMonitor {
    output_dir: PathBuf,
}

impl AflMonitor {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    async fn read(&self, require_stats: bool) -> Result<Option<AflStats>> {
        let dir = instance_dir(&self.output_dir);
        let stats = match read_optional(&dir.join("fuzzer_stats")).await? {
            Some(text) if !text.trim().is_empty() => parse_progress(&text),
            _ if require_stats => return Ok(None),
            _ => Map::new(),
        };

        let execs_per_sec = stats
            .get("execs_per_sec")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        Ok(Some(AflStats {
            crashes: count_entries(&dir.join("crashes")).await?,
            hangs: count_entries(&dir.join("hangs")).await?,
            execs_per_sec,
            stats,
        }))
    }

    async fn read_coverage(&self) -> Option<Value> {
        for dir in [instance_dir(&self.output_dir), self.output_dir.clone()] {
            match read_optional(&dir.join("coverage")).await {
                Ok(Some(text)) => match serde_json::from_str(&text) {
                    Ok(value) => return Some(value),
                    Err(e) => warn!(error = %e, "Unreadable coverage summary"),
                },
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Failed to read coverage summary"),
            }
        }
        None
    }
}

#[async_trait]
impl ToolMonitor for AflMonitor {
    fn samples_progress(&self) -> bool {
        true
    }

    fn parses_status_blocks(&self) -> bool {
        true
    }

    async fn sample(&self) -> Result<Option<RecordPatch>> {
        Ok(self.read(true).await?.map(AflStats::into_patch))
    }

    async fn finalize(&self, _ctx: &FinalContext) -> Result<RecordPatch> {
        let mut patch = self
            .read(false)
            .await?
            .map(AflStats::into_patch)
            .unwrap_or_default();
        if let Some(coverage) = self.read_coverage().await {
            patch = patch.set(fields::COVERAGE, coverage);
        }
        Ok(patch)
    }
}
