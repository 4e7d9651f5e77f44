//! Process Supervisor
//!
//! Launches external tools as children in their own process group and
//! observes their exit. Launching returns as soon as the child exists; a
//! spawn failure (missing binary, unreadable stdin file) is reported
//! synchronously as `OrchestratorError::Launch`, while a child that starts
//! and later fails surfaces only through its exit notification.

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};

/// Where the child's stdout goes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutputTarget {
    #[default]
    Piped,
    File(PathBuf),
}

/// Command line, environment and stdio wiring for one tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    pub stdin: Option<PathBuf>,
    pub stdout: OutputTarget,
    /// Invocation runs under the `timeout` wrapper
    pub timeout_wrapped: bool,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
            stdin: None,
            stdout: OutputTarget::Piped,
            timeout_wrapped: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn stdin_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    pub fn stdout_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = OutputTarget::File(path.into());
        self
    }

    /// Run the command as `<timeout_bin> <limit> <program> <args...>`
    pub fn within_timeout(self, timeout_bin: &str, limit: impl Into<String>) -> Self {
        let mut args = vec![limit.into(), self.program];
        args.extend(self.args);
        Self {
            program: timeout_bin.to_string(),
            args,
            timeout_wrapped: true,
            ..self
        }
    }

    /// Shell-like rendering for logs
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push_str(&format!("{:?}", arg));
            } else {
                line.push_str(arg);
            }
        }
        if let Some(stdin) = &self.stdin {
            line.push_str(&format!(" < {}", stdin.display()));
        }
        if let OutputTarget::File(path) = &self.stdout {
            line.push_str(&format!(" > {}", path.display()));
        }
        line
    }

    fn command(&self) -> Result<Command> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stderr(Stdio::piped())
            .process_group(0);

        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        match &self.stdin {
            Some(path) => {
                let file = std::fs::File::open(path).map_err(|e| {
                    OrchestratorError::launch(format!("Cannot open {}: {}", path.display(), e))
                })?;
                cmd.stdin(Stdio::from(file));
            }
            None => {
                cmd.stdin(Stdio::null());
            }
        }

        match &self.stdout {
            OutputTarget::Piped => {
                cmd.stdout(Stdio::piped());
            }
            OutputTarget::File(path) => {
                let file = std::fs::File::create(path).map_err(|e| {
                    OrchestratorError::launch(format!("Cannot create {}: {}", path.display(), e))
                })?;
                cmd.stdout(Stdio::from(file));
            }
        }

        Ok(cmd)
    }
}

/// How a process ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn describe(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("Process exited with code {}", code),
            (None, Some(sig)) => match Signal::try_from(sig) {
                Ok(signal) => format!("Process killed by {}", signal.as_str()),
                Err(_) => format!("Process killed by signal {}", sig),
            },
            (None, None) => "Process exited with unknown status".to_string(),
        }
    }
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

/// A launched child
///
/// `exited` resolves once with the exit info; the streams are `None` when
/// the corresponding output was redirected to a file.
pub struct ProcessHandle {
    pub pid: u32,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
    pub exited: oneshot::Receiver<ExitInfo>,
}

impl ProcessHandle {
    pub fn signal(&self, signal: Signal) -> Result<bool> {
        signal_process_group(self.pid, signal)
    }
}

/// Spawn a long-running tool. Does not wait for it.
pub fn start(spec: &LaunchSpec) -> Result<ProcessHandle> {
    let mut cmd = spec.command()?;
    let mut child = cmd
        .spawn()
        .map_err(|e| OrchestratorError::launch(format!("{}: {}", spec.program, e)))?;

    let pid = child
        .id()
        .ok_or_else(|| OrchestratorError::launch(format!("{}: exited during launch", spec.program)))?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (tx, exited) = oneshot::channel();
    tokio::spawn(async move {
        let info = match child.wait().await {
            Ok(status) => ExitInfo::from(status),
            Err(e) => {
                warn!(pid, error = %e, "Failed to wait for child");
                ExitInfo::default()
            }
        };
        debug!(pid, code = ?info.code, signal = ?info.signal, "Child exited");
        let _ = tx.send(info);
    });

    debug!(pid, command = %spec.command_line(), "Launched process");
    Ok(ProcessHandle {
        pid,
        stdout,
        stderr,
        exited,
    })
}

/// Output of a command run to completion
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit: ExitInfo,
    pub stdout: String,
    pub stderr: String,
}

/// Run a short synchronous step (compilation) and collect its output
pub async fn run_to_completion(spec: &LaunchSpec) -> Result<CommandOutput> {
    let mut cmd = spec.command()?;
    let output = cmd
        .output()
        .await
        .map_err(|e| OrchestratorError::launch(format!("{}: {}", spec.program, e)))?;

    Ok(CommandOutput {
        exit: ExitInfo::from(output.status),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// A pid that can only name another process. 0 and 1 address the caller's
/// own group and init; values past `i32::MAX` wrap to negative pids.
fn target_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid).ok().filter(|p| *p > 1).map(Pid::from_raw)
}

/// Signal every process in the group led by `pid`.
///
/// Returns `false` when the group no longer exists or `pid` cannot name one.
pub fn signal_process_group(pid: u32, signal: Signal) -> Result<bool> {
    let Some(target) = target_pid(pid) else {
        return Ok(false);
    };
    match killpg(target, signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(OrchestratorError::Io(e.into())),
    }
}

/// Whether a process with this pid exists
pub fn is_alive(pid: u32) -> bool {
    target_pid(pid).is_some_and(|target| matches!(kill(target, None), Ok(()) | Err(Errno::EPERM)))
}
