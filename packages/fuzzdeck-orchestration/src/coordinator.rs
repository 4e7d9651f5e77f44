//! Job Lifecycle Coordinator
//!
//! Owns the per-job state machine and is the single entry point for
//! submit / stop / read / watch / download. Once its record exists, every
//! job gets one task, detached from the request that launched it:
//!
//! ```text
//! submit ──► validate ──► prepare ──► record(queued|compiling)
//!                                              │ spawn
//!                    [build] ──► re-read record (skip if terminal) ──► start
//!                                                                   │
//!                             registry.register ◄───────────────────┘
//!                             record(running, pid)
//!                             supervise ──► sampler + stdout/stderr pumps
//!                                                 await exit
//!                                                 stop sampler, drain readers
//!                                                 finalize (tool artifacts)
//!                                                 one terminal write
//!                                                 registry.remove, mark finished
//! ```
//!
//! The terminal write is the last write of a job; `stop` waits for it so a
//! caller that sees `stop` return also sees the terminal record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use fuzzdeck_storage::{
    fields, ArtifactStore, JobRecord, JobStatus, JobStore, LogLine, RecordPatch, RecordWatch,
};
use nix::sys::signal::Signal;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::OrchestratorConfig;
use crate::download::{resolve_download, DownloadPayload, DownloadRequest};
use crate::error::{OrchestratorError, Result};
use crate::job::{resolve_exit, JobIdGenerator, JobStateMachine};
use crate::parser::StreamParser;
use crate::recorder::{status_of, JobRecorder};
use crate::registry::{LiveProcess, ProcessRegistry};
use crate::sampler::spawn_sampler;
use crate::streams::{pump_stderr, pump_stdout, StderrTail};
use crate::submission::Submission;
use crate::supervisor::{self, is_alive, signal_process_group, LaunchSpec, ProcessHandle};
use crate::tools::{FinalContext, PrepareContext, PreparedJob, Tool, ToolMonitor, ToolParams};

/// How long `stop` waits for exit when escalation is disabled
const UNESCALATED_STOP_WAIT: Duration = Duration::from_secs(10);

/// How long `stop` waits after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(5);

pub const ORPHAN_REASON: &str = "Orchestrator restarted while job was active";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub job_id: String,
    pub message: String,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopOutcome {
    pub message: String,
}

impl StopOutcome {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result of closing out jobs left behind by a previous instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Records moved to `failed`
    pub closed: usize,
    /// Still-alive process groups that were sent SIGTERM
    pub signalled: usize,
}

pub struct Coordinator {
    config: Arc<OrchestratorConfig>,
    store: Arc<dyn JobStore>,
    artifacts: ArtifactStore,
    registry: Arc<ProcessRegistry>,
    ids: JobIdGenerator,
}

impl Coordinator {
    pub fn new(config: OrchestratorConfig, store: Arc<dyn JobStore>) -> Self {
        let artifacts = ArtifactStore::new(config.data_dir.clone());
        Self {
            config: Arc::new(config),
            store,
            artifacts,
            registry: Arc::new(ProcessRegistry::new()),
            ids: JobIdGenerator::new(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    fn recorder(&self, tool: Tool, job_id: &str) -> JobRecorder {
        JobRecorder::new(
            self.store.clone(),
            tool.collection(),
            job_id,
            self.config.max_log_lines,
        )
    }

    /// Validate, persist inputs, create the record and launch the tool.
    ///
    /// Returns once the process is running. Everything after the record is
    /// created runs in a detached task, so dropping this future neither
    /// strands the record nor leaves a process unsupervised.
    #[instrument(skip_all, fields(tool = %tool))]
    pub async fn submit(&self, tool: Tool, submission: Submission) -> Result<SubmitOutcome> {
        let params = ToolParams::validate(tool, submission, &self.config)?;
        let job_id = self.ids.next(tool);

        let prepared = match self.prepare(params, &job_id).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.discard_inputs(&job_id).await;
                return Err(e);
            }
        };

        let initial = if prepared.build.is_some() {
            JobStatus::Compiling
        } else {
            JobStatus::Queued
        };
        let mut record = JobRecord::new(&job_id, tool.as_str(), initial, prepared.parameters);
        record.artifacts = prepared.artifacts;
        let created = match record.to_document() {
            Ok(doc) => self
                .store
                .create(&tool.collection(), &job_id, doc)
                .await
                .map_err(OrchestratorError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = created {
            self.discard_inputs(&job_id).await;
            return Err(e);
        }
        info!(job_id = %job_id, status = %initial, "Created job record");

        let (launched_tx, launched_rx) = oneshot::channel();
        tokio::spawn(launch_job(
            PendingJob {
                tool,
                initial,
                build: prepared.build,
                launch: prepared.launch,
                monitor: prepared.monitor,
                recorder: self.recorder(tool, &job_id),
                registry: self.registry.clone(),
                config: self.config.clone(),
            },
            launched_tx,
        ));

        launched_rx.await.unwrap_or_else(|_| {
            Err(OrchestratorError::launch(format!(
                "Launch task for {} ended without a result",
                job_id
            )))
        })
    }

    /// Allocate the job's directories and write its inputs on the blocking pool
    async fn prepare(&self, params: ToolParams, job_id: &str) -> Result<PreparedJob> {
        let artifacts = self.artifacts.clone();
        let config = self.config.clone();
        let job_id = job_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<PreparedJob> {
            let paths = artifacts.allocate(&job_id)?;
            params.prepare(&PrepareContext {
                job_id: &job_id,
                paths: &paths,
                artifacts: &artifacts,
                config: &config,
            })
        })
        .await
        .map_err(|e| OrchestratorError::Other(e.into()))?
    }

    /// Remove what `prepare` wrote for a job that never got a record
    async fn discard_inputs(&self, job_id: &str) {
        let artifacts = self.artifacts.clone();
        let id = job_id.to_string();
        let result = tokio::task::spawn_blocking(move || artifacts.discard(&id)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(job_id, error = %e, "Failed to discard job inputs"),
            Err(e) => warn!(job_id, error = %e, "Discard task failed"),
        }
    }

    /// Stop a job. Never errors for jobs that are unknown or already over.
    #[instrument(skip(self))]
    pub async fn stop(&self, tool: Tool, job_id: &str) -> Result<StopOutcome> {
        if let Some(live) = self.registry.get(job_id).filter(|l| l.tool == tool) {
            return Ok(self.stop_live(tool, job_id, live).await);
        }

        let Some(doc) = self.store.get(&tool.collection(), job_id).await? else {
            return Ok(StopOutcome::new(format!(
                "Job {} not found; nothing to stop",
                job_id
            )));
        };
        let record = JobRecord::from_document(doc)?;
        if record.is_terminal() {
            return Ok(StopOutcome::new(format!("Job already {}", record.status)));
        }

        warn!(job_id, "No live process for job; closing the record only");
        let patch = RecordPatch::new()
            .status(JobStatus::Stopped)
            .end_time(Utc::now())
            .pid(None)
            .touch()
            .append_logs(
                vec![LogLine::system("Stopped without a live process handle")],
                self.config.max_log_lines,
            );
        self.store
            .merge_update(&tool.collection(), job_id, patch)
            .await?;
        Ok(StopOutcome::new("Job marked as stopped"))
    }

    async fn stop_live(&self, tool: Tool, job_id: &str, live: Arc<LiveProcess>) -> StopOutcome {
        if live.request_stop() {
            info!(job_id, pid = live.pid, "Stopping job");
            self.recorder(tool, job_id)
                .log(LogLine::system("Stop requested"))
                .await;
            if let Err(e) = live.signal(Signal::SIGINT) {
                warn!(job_id, error = %e, "Failed to signal process group");
            }
        }

        let grace = self.config.stop_grace();
        if timeout(grace.unwrap_or(UNESCALATED_STOP_WAIT), live.finished())
            .await
            .is_ok()
        {
            return StopOutcome::new("Job stopped");
        }

        if grace.is_some() {
            warn!(job_id, pid = live.pid, "Process ignored SIGINT; sending SIGKILL");
            if let Err(e) = live.signal(Signal::SIGKILL) {
                warn!(job_id, error = %e, "Failed to kill process group");
            }
            if timeout(KILL_WAIT, live.finished()).await.is_ok() {
                return StopOutcome::new("Job stopped");
            }
        }
        StopOutcome::new("Stop signal sent; process still exiting")
    }

    /// Stop every supervised job, e.g. on shutdown
    pub async fn stop_all(&self) {
        let live: Vec<_> = self
            .registry
            .job_ids()
            .into_iter()
            .filter_map(|id| self.registry.get(&id).map(|l| (id, l)))
            .collect();
        if live.is_empty() {
            return;
        }
        info!("Stopping {} running jobs", live.len());
        let results = futures::future::join_all(live.into_iter().map(|(id, l)| async move {
            let result = self.stop(l.tool, &id).await;
            (id, result)
        }))
        .await;
        for (id, result) in results {
            if let Err(e) = result {
                warn!(job_id = %id, error = %e, "Failed to stop job");
            }
        }
    }

    pub async fn get(&self, tool: Tool, job_id: &str) -> Result<JobRecord> {
        match self.store.get(&tool.collection(), job_id).await? {
            Some(doc) => Ok(JobRecord::from_document(doc)?),
            None => Err(OrchestratorError::JobNotFound(job_id.to_string())),
        }
    }

    /// All jobs of one tool, newest first
    pub async fn list(&self, tool: Tool) -> Result<Vec<JobRecord>> {
        let mut records = Vec::new();
        for doc in self.store.list(&tool.collection()).await? {
            match JobRecord::from_document(doc) {
                Ok(record) => records.push(record),
                Err(e) => warn!(tool = %tool, error = %e, "Skipping unreadable job record"),
            }
        }
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(records)
    }

    /// Current record plus a stream of every later snapshot
    pub async fn watch(&self, tool: Tool, job_id: &str) -> Result<(JobRecord, RecordWatch)> {
        // Subscribe first so no write between the read and the subscription is lost
        let watch = self.store.watch(&tool.collection(), job_id);
        let record = self.get(tool, job_id).await?;
        Ok((record, watch))
    }

    #[instrument(skip(self))]
    pub async fn download(
        &self,
        tool: Tool,
        job_id: &str,
        request: DownloadRequest,
    ) -> Result<DownloadPayload> {
        request.category.ensure_valid_for(tool)?;
        self.get(tool, job_id).await?;
        let artifacts = self.artifacts.clone();
        let job_id = job_id.to_string();
        tokio::task::spawn_blocking(move || resolve_download(&artifacts, tool, &job_id, &request))
            .await
            .map_err(|e| OrchestratorError::Other(e.into()))?
    }

    /// Close out records a previous instance left non-terminal.
    ///
    /// Their processes are no longer supervised; a still-alive process group
    /// is sent SIGTERM when `reap_orphans` is set.
    #[instrument(skip(self))]
    pub async fn reconcile_orphans(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for tool in Tool::ALL {
            let collection = tool.collection();
            for doc in self.store.list(&collection).await? {
                let record = match JobRecord::from_document(doc) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(tool = %tool, error = %e, "Skipping unreadable job record");
                        continue;
                    }
                };
                if record.is_terminal() || self.registry.get(&record.job_id).is_some() {
                    continue;
                }

                let mut reason = ORPHAN_REASON.to_string();
                if let Some(pid) = record.pid.filter(|pid| is_alive(*pid)) {
                    if self.config.reap_orphans {
                        match signal_process_group(pid, Signal::SIGTERM) {
                            Ok(true) => {
                                reason.push_str(&format!("; sent SIGTERM to process group {}", pid));
                                report.signalled += 1;
                            }
                            Ok(false) => {}
                            Err(e) => warn!(job_id = %record.job_id, pid, error = %e, "Failed to signal orphan"),
                        }
                    } else {
                        reason.push_str(&format!("; process {} may still be running", pid));
                    }
                }

                let patch = terminal_patch(JobStatus::Failed, Some(&reason))
                    .append_logs(vec![LogLine::system(reason.clone())], self.config.max_log_lines);
                self.store
                    .merge_update(&collection, &record.job_id, patch)
                    .await?;
                warn!(job_id = %record.job_id, "{}", reason);
                report.closed += 1;
            }
        }

        if report.closed > 0 {
            info!(
                "Reconciled {} orphaned jobs ({} signalled)",
                report.closed, report.signalled
            );
        }
        Ok(report)
    }
}

/// Status, `endTime` and `pid` always travel together
fn terminal_patch(status: JobStatus, reason: Option<&str>) -> RecordPatch {
    let patch = RecordPatch::new()
        .status(status)
        .end_time(Utc::now())
        .pid(None)
        .touch();
    match reason {
        Some(reason) if status == JobStatus::Failed => patch.error(reason),
        _ => patch,
    }
}

/// Fail a job that never got a running process
async fn close_before_launch(recorder: &JobRecorder, reason: String, mut lines: Vec<LogLine>) {
    lines.push(LogLine::system(reason.clone()));
    let patch = terminal_patch(JobStatus::Failed, Some(&reason))
        .append_logs(lines, recorder.max_log_lines());
    if let Err(e) = recorder.apply(patch).await {
        error!(job_id = %recorder.job_id(), error = %e, "Failed to record launch failure");
    }
}

struct PendingJob {
    tool: Tool,
    initial: JobStatus,
    build: Option<LaunchSpec>,
    launch: LaunchSpec,
    monitor: Arc<dyn ToolMonitor>,
    recorder: JobRecorder,
    registry: Arc<ProcessRegistry>,
    config: Arc<OrchestratorConfig>,
}

/// Build, launch and supervise one job. The launch result goes to
/// `launched`; a dropped receiver does not stop the job.
async fn launch_job(job: PendingJob, launched: oneshot::Sender<Result<SubmitOutcome>>) {
    let PendingJob {
        tool,
        initial,
        build,
        launch,
        monitor,
        recorder,
        registry,
        config,
    } = job;
    let job_id = recorder.job_id().to_string();

    if let Some(build) = &build {
        if let Err(e) = build_step(&recorder, build).await {
            let _ = launched.send(Err(e));
            return;
        }
    }

    // Closed out by a record-only stop before the process existed
    match recorder.status().await {
        Ok(Some(status)) if status.is_terminal() => {
            info!(job_id = %job_id, status = %status, "Job closed before launch; not starting it");
            recorder
                .log(LogLine::system(format!("Launch skipped: job already {}", status)))
                .await;
            let _ = launched.send(Ok(SubmitOutcome {
                message: format!("{} job {} before launch", tool, status),
                job_id,
                pid: None,
            }));
            return;
        }
        Ok(_) => {}
        Err(e) => warn!(job_id = %job_id, error = %e, "Could not re-read record before launch"),
    }

    let handle = match supervisor::start(&launch) {
        Ok(handle) => handle,
        Err(e) => {
            close_before_launch(&recorder, e.to_string(), Vec::new()).await;
            error!(job_id = %job_id, error = %e, "Launch failed");
            let _ = launched.send(Err(e));
            return;
        }
    };
    let pid = handle.pid;

    let live = Arc::new(LiveProcess::new(pid, tool, launch.timeout_wrapped));
    if !registry.register(&job_id, live.clone()) {
        let _ = handle.signal(Signal::SIGKILL);
        let _ = launched.send(Err(OrchestratorError::launch(format!(
            "Job {} is already supervised",
            job_id
        ))));
        return;
    }

    let running = match JobStateMachine::transition(initial, JobStatus::Running) {
        Ok(status) => RecordPatch::new()
            .status(status)
            .pid(Some(pid))
            .touch()
            .append_logs(
                vec![LogLine::system(format!("Started: {}", launch.command_line()))],
                config.max_log_lines,
            ),
        Err(e) => {
            let _ = handle.signal(Signal::SIGKILL);
            registry.remove(&job_id);
            let _ = launched.send(Err(e));
            return;
        }
    };
    let doc = match recorder.apply(running).await {
        Ok(doc) => doc,
        Err(e) => {
            let _ = handle.signal(Signal::SIGKILL);
            registry.remove(&job_id);
            error!(job_id = %job_id, pid, error = %e, "Could not record running job; killed it");
            let _ = launched.send(Err(e));
            return;
        }
    };

    // Closed out by a record-only stop between the re-read and the running write
    let stopped_early = status_of(&doc).is_some_and(|s| s.is_terminal());
    if stopped_early {
        live.request_stop();
        let _ = handle.signal(Signal::SIGTERM);
    }

    info!(job_id = %job_id, pid, "Job running");
    let outcome = SubmitOutcome {
        message: format!("{} job started", tool),
        job_id,
        pid: (!stopped_early).then_some(pid),
    };
    if launched.send(Ok(outcome)).is_err() {
        debug!(job_id = %recorder.job_id(), "Submitter went away; job keeps running");
    }

    supervise(Supervision {
        handle,
        monitor,
        recorder,
        live,
        registry,
        config,
        started: Instant::now(),
    })
    .await;
}

/// Run the build command; a failure closes the record
async fn build_step(recorder: &JobRecorder, build: &LaunchSpec) -> Result<()> {
    recorder
        .log(LogLine::system(format!("Compiling: {}", build.command_line())))
        .await;
    let output = match supervisor::run_to_completion(build).await {
        Ok(output) => output,
        Err(e) => {
            close_before_launch(recorder, e.to_string(), Vec::new()).await;
            return Err(e);
        }
    };
    if !output.exit.success() {
        let stderr = output.stderr.trim();
        let reason = if stderr.is_empty() {
            output.exit.describe()
        } else {
            stderr.to_string()
        };
        let lines = stderr.lines().map(LogLine::stderr).collect();
        close_before_launch(recorder, format!("Compilation failed: {}", reason), lines).await;
        warn!(job_id = %recorder.job_id(), "Compilation failed");
        return Err(OrchestratorError::CompileFailed(reason));
    }
    debug!(job_id = %recorder.job_id(), "Compilation succeeded");
    Ok(())
}

struct Supervision {
    handle: ProcessHandle,
    monitor: Arc<dyn ToolMonitor>,
    recorder: JobRecorder,
    live: Arc<LiveProcess>,
    registry: Arc<ProcessRegistry>,
    config: Arc<OrchestratorConfig>,
    started: Instant,
}

async fn supervise(job: Supervision) {
    let Supervision {
        handle,
        monitor,
        recorder,
        live,
        registry,
        config,
        started,
    } = job;
    let ProcessHandle {
        stdout,
        stderr,
        exited,
        ..
    } = handle;

    let cancel = CancellationToken::new();
    let sampler = monitor.samples_progress().then(|| {
        spawn_sampler(
            monitor.clone(),
            recorder.clone(),
            config.sample_interval(),
            cancel.clone(),
        )
    });

    let tail = StderrTail::new();
    let stdout_task = stdout.map(|out| {
        let parser = if monitor.parses_status_blocks() {
            StreamParser::new(config.status_block_marker.clone(), config.block_throttle())
        } else {
            StreamParser::lines_only()
        };
        tokio::spawn(pump_stdout(out, parser, recorder.clone()))
    });
    let stderr_task = stderr.map(|err| tokio::spawn(pump_stderr(err, recorder.clone(), tail.clone())));

    let exit = exited.await.unwrap_or_default();
    cancel.cancel();
    if let Some(sampler) = sampler {
        if let Err(e) = sampler.await {
            warn!(job_id = %recorder.job_id(), error = %e, "Sampler task failed");
        }
    }

    for task in [stdout_task, stderr_task].into_iter().flatten() {
        let abort = task.abort_handle();
        if timeout(config.reader_drain(), task).await.is_err() {
            warn!(job_id = %recorder.job_id(), "Output reader did not drain; abandoning it");
            abort.abort();
        }
    }

    let ctx = FinalContext {
        exit,
        elapsed: started.elapsed(),
    };
    let collected = match monitor.finalize(&ctx).await {
        Ok(patch) => patch,
        Err(e) => {
            warn!(job_id = %recorder.job_id(), error = %e, "Final artifact collection failed");
            RecordPatch::new()
        }
    };

    let resolution = resolve_exit(
        &exit,
        live.stop_requested(),
        live.timeout_wrapped,
        &tail.snapshot(),
    );
    let summary = match &resolution.reason {
        Some(reason) if resolution.status != JobStatus::Failed => {
            format!("{} ({})", exit.describe(), reason)
        }
        _ => exit.describe(),
    };

    let mut patch = collected
        .status(resolution.status)
        .end_time(Utc::now())
        .pid(None)
        .set(fields::EXIT_CODE, exit.code)
        .set(fields::EXIT_SIGNAL, exit.signal)
        .touch()
        .append_logs(vec![LogLine::system(summary)], recorder.max_log_lines());
    if resolution.status == JobStatus::Failed {
        if let Some(reason) = &resolution.reason {
            patch = patch.error(reason.clone());
        }
    }

    if let Err(e) = recorder.apply(patch).await {
        error!(job_id = %recorder.job_id(), error = %e, "Failed to write terminal job state");
    }

    registry.remove(recorder.job_id());
    live.mark_finished();
    info!(
        job_id = %recorder.job_id(),
        status = %resolution.status,
        elapsed_ms = ctx.elapsed.as_millis() as u64,
        "Job finished"
    );
}
