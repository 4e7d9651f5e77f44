use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use fuzzdeck_storage::JobStatus;
use nix::sys::signal::Signal;

use crate::error::{OrchestratorError, Result};
use crate::supervisor::ExitInfo;
use crate::tools::Tool;

/// Exit code GNU `timeout` reports when the duration boundary fired
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Job id allocator: `{tool}_{unix_millis}`, strictly increasing within one
/// instance even when two submissions land in the same millisecond.
#[derive(Debug, Default)]
pub struct JobIdGenerator {
    last: AtomicI64,
}

impl JobIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, tool: Tool) -> String {
        let now = Utc::now().timestamp_millis();
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(current + 1);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return format!("{}_{}", tool.as_str(), candidate),
                Err(observed) => current = observed,
            }
        }
    }
}

/// Job state machine
///
/// `queued → compiling → running → {completed | failed | stopped}`.
/// `compiling` may be skipped, and any non-terminal state may fail or be
/// stopped.
pub struct JobStateMachine;

impl JobStateMachine {
    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        use JobStatus::*;
        match (from, to) {
            (Queued, Compiling) | (Queued, Running) | (Compiling, Running) => true,
            (Running, Completed) => true,
            (from, Failed) | (from, Stopped) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn transition(from: JobStatus, to: JobStatus) -> Result<JobStatus> {
        if Self::can_transition(from, to) {
            Ok(to)
        } else {
            Err(OrchestratorError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }
}

/// Terminal status for an exited process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitResolution {
    pub status: JobStatus,
    pub reason: Option<String>,
}

/// Resolve the terminal status of an exited process.
///
/// Order: coordinator-requested stop, clean exit, duration boundary of the
/// `timeout` wrapper, graceful signal, everything else fails with the tail
/// of stderr as the reason.
pub fn resolve_exit(
    exit: &ExitInfo,
    stop_requested: bool,
    timeout_wrapped: bool,
    stderr_tail: &[String],
) -> ExitResolution {
    let stopped = |reason: &str| ExitResolution {
        status: JobStatus::Stopped,
        reason: Some(reason.to_string()),
    };

    if stop_requested {
        return stopped("Stopped by user");
    }
    if exit.code == Some(0) {
        return ExitResolution {
            status: JobStatus::Completed,
            reason: None,
        };
    }
    if timeout_wrapped && exit.code == Some(TIMEOUT_EXIT_CODE) {
        return stopped("Duration limit reached");
    }
    if matches!(exit.signal, Some(s) if s == Signal::SIGINT as i32 || s == Signal::SIGTERM as i32) {
        return stopped("Terminated by signal");
    }

    let mut reason = exit.describe();
    if !stderr_tail.is_empty() {
        reason.push_str(": ");
        reason.push_str(&stderr_tail.join("\n"));
    }
    ExitResolution {
        status: JobStatus::Failed,
        reason: Some(reason),
    }
}
