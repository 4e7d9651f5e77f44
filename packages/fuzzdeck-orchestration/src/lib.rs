/*
 * Fuzzdeck Orchestration - job lifecycle for external fuzzing tools
 *
 * Launches third-party fuzzers as supervised child processes and mirrors
 * their progress into the job record store.
 *
 * Architecture:
 * - Tool adapters (validate / prepare / monitor per binary)
 * - Process Supervisor (process groups, signals, exit observation)
 * - Progress Sampler (timer-driven reads of on-disk stats)
 * - Output Stream Parser (stdout/stderr → log lines + status blocks)
 * - Lifecycle Coordinator (state machine, terminal reconciliation)
 * - Downloads (single files / zip bundles of tool output)
 */

// Public modules
pub mod config;
pub mod coordinator;
pub mod download;
pub mod error;
pub mod job;
pub mod parser;
pub mod recorder;
pub mod registry;
pub mod sampler;
pub mod stats;
pub mod streams;
pub mod submission;
pub mod supervisor;
pub mod tools;

// Re-exports
pub use config::{OrchestratorConfig, ToolBinaries};
pub use coordinator::{Coordinator, ReconcileReport, StopOutcome, SubmitOutcome, ORPHAN_REASON};
pub use download::{ArtifactCategory, DownloadPayload, DownloadRequest};
pub use error::{ErrorCategory, OrchestratorError, Result};
pub use job::{resolve_exit, ExitResolution, JobIdGenerator, JobStateMachine};
pub use parser::{ParsedOutput, StderrParser, StreamParser};
pub use registry::{LiveProcess, ProcessRegistry};
pub use submission::{Submission, UploadedFile};
pub use supervisor::{ExitInfo, LaunchSpec};
pub use tools::{FinalContext, Tool, ToolMonitor, ToolParams};
