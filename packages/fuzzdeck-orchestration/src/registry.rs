//! Live process registry
//!
//! The only shared mutable structure across jobs: `job_id → LiveProcess` for
//! every child this orchestrator instance is currently supervising. Entries
//! are inserted on launch and removed by the exit handler after the terminal
//! record write. Nothing here survives a restart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nix::sys::signal::Signal;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::supervisor::signal_process_group;
use crate::tools::Tool;

/// A supervised child process
#[derive(Debug)]
pub struct LiveProcess {
    pub pid: u32,
    pub tool: Tool,
    pub timeout_wrapped: bool,
    stop_requested: AtomicBool,
    finished: CancellationToken,
}

impl LiveProcess {
    pub fn new(pid: u32, tool: Tool, timeout_wrapped: bool) -> Self {
        Self {
            pid,
            tool,
            timeout_wrapped,
            stop_requested: AtomicBool::new(false),
            finished: CancellationToken::new(),
        }
    }

    /// Mark the job as stopped by the coordinator. Returns `true` for the
    /// first request only.
    pub fn request_stop(&self) -> bool {
        !self.stop_requested.swap(true, Ordering::SeqCst)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn signal(&self, signal: Signal) -> Result<bool> {
        signal_process_group(self.pid, signal)
    }

    /// Set once the terminal record write has happened
    pub fn mark_finished(&self) {
        self.finished.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Resolves once the job has been closed out
    pub async fn finished(&self) {
        self.finished.cancelled().await
    }
}

#[derive(Debug, Default)]
pub struct ProcessRegistry {
    live: DashMap<String, Arc<LiveProcess>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a process. Refuses a second live process for the same job.
    pub fn register(&self, job_id: &str, process: Arc<LiveProcess>) -> bool {
        match self.live.entry(job_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(process);
                true
            }
        }
    }

    pub fn get(&self, job_id: &str) -> Option<Arc<LiveProcess>> {
        self.live.get(job_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, job_id: &str) -> Option<Arc<LiveProcess>> {
        self.live.remove(job_id).map(|(_, process)| process)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.live.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}
