//! Job record schema
//!
//! Records are stored as schema-less JSON documents. `JobRecord` is the typed
//! view used by the orchestrator; every field defaults so that documents
//! written by older or partial writers still load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;

/// A schema-less job document
pub type Document = Map<String, Value>;

/// Document field names shared by every writer
pub mod fields {
    pub const JOB_ID: &str = "jobId";
    pub const TOOL: &str = "tool";
    pub const STATUS: &str = "status";
    pub const PARAMETERS: &str = "parameters";
    pub const START_TIME: &str = "startTime";
    pub const END_TIME: &str = "endTime";
    pub const PID: &str = "pid";
    pub const STATS: &str = "stats";
    pub const CRASHES: &str = "crashes";
    pub const HANGS: &str = "hangs";
    pub const EXECS_PER_SEC: &str = "execsPerSec";
    pub const COVERAGE: &str = "coverage";
    pub const TOOL_OUTPUT: &str = "toolOutput";
    pub const LOGS: &str = "logs";
    pub const ARTIFACTS: &str = "artifacts";
    pub const RESULTS: &str = "results";
    pub const ERROR: &str = "error";
    pub const EXIT_CODE: &str = "exitCode";
    pub const EXIT_SIGNAL: &str = "exitSignal";
    pub const LAST_UPDATED: &str = "lastUpdated";
}

/// Job status
///
/// `queued → compiling → running → {completed | failed | stopped}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Queued,
    #[serde(alias = "compiled")]
    Compiling,
    #[serde(alias = "fuzzing")]
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Compiling => "compiling",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Stopped
        )
    }

    /// Position along the state machine; terminal states share the last rank
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Compiling => 1,
            JobStatus::Running => 2,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Stopped => 3,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Origin of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    #[default]
    Stdout,
    Stderr,
    /// Orchestrator-authored lines (launch, exit, stop)
    System,
}

/// One persisted log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "LogLineRepr")]
pub struct LogLine {
    pub kind: LogKind,
    /// Set when the line carries an error marker or came from stderr
    pub error: bool,
    pub text: String,
}

impl LogLine {
    pub fn stdout(text: impl Into<String>, error: bool) -> Self {
        Self {
            kind: LogKind::Stdout,
            error,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Stderr,
            error: true,
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            kind: LogKind::System,
            error: false,
            text: text.into(),
        }
    }
}

// Older documents stored logs as bare strings with an "ERROR: " prefix.
#[derive(Deserialize)]
#[serde(untagged)]
enum LogLineRepr {
    Plain(String),
    Tagged {
        #[serde(default)]
        kind: LogKind,
        #[serde(default)]
        error: bool,
        #[serde(default)]
        text: String,
    },
}

impl From<LogLineRepr> for LogLine {
    fn from(repr: LogLineRepr) -> Self {
        match repr {
            LogLineRepr::Plain(text) => match text.strip_prefix("ERROR: ") {
                Some(rest) => LogLine::stderr(rest),
                None => LogLine::stdout(text, false),
            },
            LogLineRepr::Tagged { kind, error, text } => LogLine { kind, error, text },
        }
    }
}

/// References to generated outputs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArtifactRefs {
    pub upload_dir: Option<String>,
    pub output_dir: Option<String>,
    /// Primary input file as stored (with internal prefix)
    pub input_file: Option<String>,
    pub input_sha256: Option<String>,
    /// Generated files relative to `output_dir`
    pub files: Vec<String>,
    pub file_count: u64,
}

/// Typed view of a job document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: String,
    pub tool: String,
    pub status: JobStatus,
    pub parameters: Map<String, Value>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub pid: Option<u32>,
    pub stats: Map<String, Value>,
    pub crashes: u64,
    pub hangs: u64,
    pub execs_per_sec: f64,
    pub coverage: Value,
    pub tool_output: Map<String, Value>,
    pub logs: Vec<LogLine>,
    pub artifacts: ArtifactRefs,
    pub results: Value,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<i32>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Fresh record in its initial state
    pub fn new(
        job_id: impl Into<String>,
        tool: impl Into<String>,
        status: JobStatus,
        parameters: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            tool: tool.into(),
            status,
            parameters,
            start_time: Some(now),
            last_updated: Some(now),
            ..Default::default()
        }
    }

    pub fn from_document(doc: Document) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(doc))?)
    }

    pub fn to_document(&self) -> Result<Document> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(crate::StorageError::serialization(format!(
                "Job record serialized to non-object: {}",
                other
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_record_is_open() {
        let record = JobRecord::new("afl_1", "afl", JobStatus::Compiling, Map::new());
        assert_eq!(record.status, JobStatus::Compiling);
        assert!(record.start_time.is_some());
        assert!(record.end_time.is_none());
        assert!(record.pid.is_none());
    }

    #[test]
    fn test_partial_document_defaults() {
        let doc = json!({ "jobId": "zzuf_9", "status": "running" });
        let record = JobRecord::from_document(doc.as_object().unwrap().clone()).unwrap();
        assert_eq!(record.job_id, "zzuf_9");
        assert_eq!(record.status, JobStatus::Running);
        assert!(record.logs.is_empty());
        assert_eq!(record.crashes, 0);
        assert!(record.end_time.is_none());
    }

    #[test]
    fn test_legacy_status_aliases() {
        let compiled: JobStatus = serde_json::from_value(json!("compiled")).unwrap();
        let fuzzing: JobStatus = serde_json::from_value(json!("fuzzing")).unwrap();
        assert_eq!(compiled, JobStatus::Compiling);
        assert_eq!(fuzzing, JobStatus::Running);
    }

    #[test]
    fn test_legacy_string_logs() {
        let doc = json!({ "logs": ["Fuzzing started with PID: 7", "ERROR: boom"] });
        let record = JobRecord::from_document(doc.as_object().unwrap().clone()).unwrap();
        assert_eq!(record.logs.len(), 2);
        assert!(!record.logs[0].error);
        assert!(record.logs[1].error);
        assert_eq!(record.logs[1].text, "boom");
    }

    #[test]
    fn test_document_roundtrip_keeps_camel_case() {
        let record = JobRecord::new("ffuf_1", "ffuf", JobStatus::Queued, Map::new());
        let doc = record.to_document().unwrap();
        assert!(doc.contains_key(fields::JOB_ID));
        assert!(doc.contains_key(fields::END_TIME));
        assert_eq!(JobRecord::from_document(doc).unwrap(), record);
    }

    #[test]
    fn test_status_rank_is_monotonic() {
        assert!(JobStatus::Queued.rank() < JobStatus::Compiling.rank());
        assert!(JobStatus::Compiling.rank() < JobStatus::Running.rank());
        assert!(JobStatus::Running.rank() < JobStatus::Stopped.rank());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
