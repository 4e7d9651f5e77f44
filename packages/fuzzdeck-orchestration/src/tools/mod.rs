//! Tool adapters
//!
//! Each wrapped binary gets:
//!
//! - a params type validated from a `Submission` with no side effects
//! - `prepare`, which writes inputs into the artifact store and yields the
//!   launch (and optional build) command
//! - a `ToolMonitor` reading its progress while running and its results
//!   after exit
//!
//! Tool-specific metrics stay typed inside the adapter and are flattened to
//! the record's open `stats` mapping only at the boundary.

pub mod afl;
pub mod dalfox;
pub mod ffuf;
pub mod radamsa;
pub mod wfuzz;
pub mod zzuf;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fuzzdeck_storage::{
    sanitize_filename, ArtifactRefs, ArtifactStore, JobPaths, RecordPatch, StoredInput,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::submission::{Submission, UploadedFile};
use crate::supervisor::{ExitInfo, LaunchSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Afl,
    Ffuf,
    Dalfox,
    Wfuzz,
    Radamsa,
    Zzuf,
}

impl Tool {
    pub const ALL: [Tool; 6] = [
        Tool::Afl,
        Tool::Ffuf,
        Tool::Dalfox,
        Tool::Wfuzz,
        Tool::Radamsa,
        Tool::Zzuf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Afl => "afl",
            Tool::Ffuf => "ffuf",
            Tool::Dalfox => "dalfox",
            Tool::Wfuzz => "wfuzz",
            Tool::Radamsa => "radamsa",
            Tool::Zzuf => "zzuf",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "afl" | "afl++" => Ok(Tool::Afl),
            "ffuf" => Ok(Tool::Ffuf),
            "dalfox" => Ok(Tool::Dalfox),
            "wfuzz" => Ok(Tool::Wfuzz),
            "radamsa" => Ok(Tool::Radamsa),
            "zzuf" => Ok(Tool::Zzuf),
            _ => Err(OrchestratorError::validation(format!("Unknown tool: {}", s))),
        }
    }

    /// Record store namespace
    pub fn collection(&self) -> String {
        format!("{}_jobs", self.as_str())
    }

    /// Tools taking file uploads (multipart) rather than a JSON body
    pub fn takes_upload(&self) -> bool {
        matches!(self, Tool::Afl | Tool::Radamsa | Tool::Zzuf)
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What `prepare` hands to the coordinator
pub struct PreparedJob {
    pub parameters: Map<String, Value>,
    pub artifacts: ArtifactRefs,
    /// Synchronous step that must succeed before launch
    pub build: Option<LaunchSpec>,
    pub launch: LaunchSpec,
    pub monitor: Arc<dyn ToolMonitor>,
}

pub struct PrepareContext<'a> {
    pub job_id: &'a str,
    pub paths: &'a JobPaths,
    pub artifacts: &'a ArtifactStore,
    pub config: &'a OrchestratorConfig,
}

impl PrepareContext<'_> {
    /// Persist the primary upload and describe it in the artifact refs
    pub fn store_input(&self, file: &UploadedFile) -> Result<(StoredInput, ArtifactRefs)> {
        let stored = self
            .artifacts
            .write_input(self.job_id, &file.filename, &file.bytes)?;
        let refs = ArtifactRefs {
            input_file: Some(stored.stored_name.clone()),
            input_sha256: Some(stored.sha256.clone()),
            ..self.base_refs()
        };
        Ok((stored, refs))
    }

    pub fn base_refs(&self) -> ArtifactRefs {
        ArtifactRefs {
            upload_dir: Some(self.paths.upload_dir.display().to_string()),
            output_dir: Some(self.paths.output_dir.display().to_string()),
            ..Default::default()
        }
    }
}

/// Passed to `ToolMonitor::finalize`
#[derive(Debug, Clone, Copy)]
pub struct FinalContext {
    pub exit: ExitInfo,
    /// Time since launch
    pub elapsed: Duration,
}

/// Per-job progress and result reader
#[async_trait]
pub trait ToolMonitor: Send + Sync {
    /// Run the Progress Sampler for this job
    fn samples_progress(&self) -> bool {
        false
    }

    /// Parse structured status blocks out of stdout
    fn parses_status_blocks(&self) -> bool {
        false
    }

    /// One sampler tick; `None` when there is nothing to report yet
    async fn sample(&self) -> Result<Option<RecordPatch>> {
        Ok(None)
    }

    /// Final artifact read after exit. Merged into the terminal write, so it
    /// must not set `status`, `endTime` or `pid`.
    async fn finalize(&self, ctx: &FinalContext) -> Result<RecordPatch>;
}

/// Validated, tool-specific submission
#[derive(Debug)]
pub enum ToolParams {
    Afl(afl::AflParams),
    Ffuf(ffuf::FfufParams),
    Dalfox(dalfox::DalfoxParams),
    Wfuzz(wfuzz::WfuzzParams),
    Radamsa(radamsa::RadamsaParams),
    Zzuf(zzuf::ZzufParams),
}

impl ToolParams {
    /// Validation only; touches neither the store nor the filesystem beyond
    /// existence checks
    pub fn validate(
        tool: Tool,
        submission: Submission,
        config: &OrchestratorConfig,
    ) -> Result<Self> {
        Ok(match tool {
            Tool::Afl => ToolParams::Afl(afl::AflParams::validate(submission, config)?),
            Tool::Ffuf => ToolParams::Ffuf(ffuf::FfufParams::validate(submission, config)?),
            Tool::Dalfox => ToolParams::Dalfox(dalfox::DalfoxParams::validate(submission, config)?),
            Tool::Wfuzz => ToolParams::Wfuzz(wfuzz::WfuzzParams::validate(submission, config)?),
            Tool::Radamsa => {
                ToolParams::Radamsa(radamsa::RadamsaParams::validate(submission, config)?)
            }
            Tool::Zzuf => ToolParams::Zzuf(zzuf::ZzufParams::validate(submission, config)?),
        })
    }

    pub fn prepare(self, ctx: &PrepareContext<'_>) -> Result<PreparedJob> {
        match self {
            ToolParams::Afl(p) => p.prepare(ctx),
            ToolParams::Ffuf(p) => p.prepare(ctx),
            ToolParams::Dalfox(p) => p.prepare(ctx),
            ToolParams::Wfuzz(p) => p.prepare(ctx),
            ToolParams::Radamsa(p) => p.prepare(ctx),
            ToolParams::Zzuf(p) => p.prepare(ctx),
        }
    }
}

/// Reject uploads over the configured cap or without a usable file name.
/// Runs before the job's directories exist.
pub(crate) fn check_upload(file: &UploadedFile, config: &OrchestratorConfig) -> Result<()> {
    if file.len() > config.max_upload_bytes {
        return Err(OrchestratorError::validation(format!(
            "File size exceeds {}MB limit",
            config.max_upload_bytes / (1024 * 1024)
        )));
    }
    if sanitize_filename(&file.filename).is_err() {
        return Err(OrchestratorError::validation(format!(
            "Invalid file name: {:?}",
            file.filename
        )));
    }
    Ok(())
}

/// Read a tool's output file; `None` when it was never written
pub(crate) async fn read_optional(path: &std::path::Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
