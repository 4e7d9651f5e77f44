//! Reader tasks pumping a child's stdout/stderr into the job record.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use fuzzdeck_storage::fields;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::parser::{ParsedOutput, StderrParser, StreamParser};
use crate::recorder::JobRecorder;

const READ_CHUNK: usize = 8192;

/// Lines of stderr kept for failure reasons
pub const STDERR_TAIL_LINES: usize = 20;

/// Most recent stderr lines of one job
#[derive(Debug, Clone, Default)]
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: &str) {
        let mut lines = self.lines.lock();
        if lines.len() == STDERR_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line.to_string());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }
}

pub async fn pump_stdout<R>(mut reader: R, mut parser: StreamParser, recorder: JobRecorder)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(job_id = %recorder.job_id(), error = %e, "stdout read failed");
                break;
            }
        };
        write_output(&recorder, parser.feed(&buf[..n], Instant::now())).await;
    }
    write_output(&recorder, parser.finish()).await;
    debug!(job_id = %recorder.job_id(), "stdout closed");
}

pub async fn pump_stderr<R>(mut reader: R, recorder: JobRecorder, tail: StderrTail)
where
    R: AsyncRead + Unpin,
{
    let mut parser = StderrParser::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(job_id = %recorder.job_id(), error = %e, "stderr read failed");
                break;
            }
        };
        let lines = parser.feed(&buf[..n]);
        for line in &lines {
            tail.push(&line.text);
        }
        if !lines.is_empty() {
            recorder
                .apply_or_warn(recorder.log_patch(lines), "stderr lines")
                .await;
        }
    }
    if let Some(line) = parser.finish() {
        tail.push(&line.text);
        recorder.log(line).await;
    }
    debug!(job_id = %recorder.job_id(), "stderr closed");
}

async fn write_output(recorder: &JobRecorder, output: ParsedOutput) {
    if output.is_empty() {
        return;
    }
    let mut patch = recorder.log_patch(output.lines);
    if let Some(block) = output.block {
        patch = patch.set(fields::TOOL_OUTPUT, Value::Object(block)).touch();
    }
    recorder.apply_or_warn(patch, "stdout output").await;
}
