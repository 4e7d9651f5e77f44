//! Orchestrator configuration
//!
//! Loaded from YAML; every field has a default so a partial file (or none)
//! is valid.
//!
//! ```yaml
//! data_dir: /var/lib/fuzzdeck
//! sample_interval_ms: 2000
//! stop_grace_ms: null      # never escalate to SIGKILL
//! binaries:
//!   afl_fuzz: /opt/aflplusplus/afl-fuzz
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Executables per tool, resolved through `PATH` unless absolute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolBinaries {
    pub afl_cc: String,
    pub afl_fuzz: String,
    pub ffuf: String,
    pub dalfox: String,
    pub wfuzz: String,
    pub radamsa: String,
    pub zzuf: String,
    /// Time-bounded execution wrapper
    pub timeout: String,
}

impl Default for ToolBinaries {
    fn default() -> Self {
        Self {
            afl_cc: "afl-clang-fast".to_string(),
            afl_fuzz: "afl-fuzz".to_string(),
            ffuf: "ffuf".to_string(),
            dalfox: "dalfox".to_string(),
            wfuzz: "wfuzz".to_string(),
            radamsa: "radamsa".to_string(),
            zzuf: "zzuf".to_string(),
            timeout: "timeout".to_string(),
        }
    }
}

impl ToolBinaries {
    fn entries(&self) -> [(&'static str, &str); 8] {
        [
            ("afl_cc", &self.afl_cc),
            ("afl_fuzz", &self.afl_fuzz),
            ("ffuf", &self.ffuf),
            ("dalfox", &self.dalfox),
            ("wfuzz", &self.wfuzz),
            ("radamsa", &self.radamsa),
            ("zzuf", &self.zzuf),
            ("timeout", &self.timeout),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Artifact store root (`uploads/`, `results/`)
    pub data_dir: PathBuf,
    pub wordlist_dir: PathBuf,
    pub default_wordlist: String,
    pub sample_interval_ms: u64,
    pub block_throttle_ms: u64,
    pub status_block_marker: String,
    /// Cap on the persisted `logs` array; oldest lines are dropped
    pub max_log_lines: usize,
    pub max_upload_bytes: u64,
    /// Delay before a graceful stop escalates to SIGKILL; `None` never escalates
    pub stop_grace_ms: Option<u64>,
    pub reader_drain_ms: u64,
    /// Signal live orphaned processes found at startup
    pub reap_orphans: bool,
    pub binaries: ToolBinaries,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./fuzz"),
            wordlist_dir: PathBuf::from("./wordlists"),
            default_wordlist: "common.txt".to_string(),
            sample_interval_ms: 2000,
            block_throttle_ms: 2000,
            status_block_marker: "______".to_string(),
            max_log_lines: 5000,
            max_upload_bytes: 50 * 1024 * 1024,
            stop_grace_ms: Some(30_000),
            reader_drain_ms: 5000,
            reap_orphans: true,
            binaries: ToolBinaries::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).map_err(OrchestratorError::config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            OrchestratorError::config(format!(
                "Cannot read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_interval_ms == 0 {
            return Err(OrchestratorError::config("sample_interval_ms must be > 0"));
        }
        if self.block_throttle_ms == 0 {
            return Err(OrchestratorError::config("block_throttle_ms must be > 0"));
        }
        if self.max_log_lines == 0 {
            return Err(OrchestratorError::config("max_log_lines must be > 0"));
        }
        if self.status_block_marker.is_empty() {
            return Err(OrchestratorError::config("status_block_marker must not be empty"));
        }
        for (name, value) in self.binaries.entries() {
            if value.trim().is_empty() {
                return Err(OrchestratorError::config(format!(
                    "binaries.{} must not be empty",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn block_throttle(&self) -> Duration {
        Duration::from_millis(self.block_throttle_ms)
    }

    pub fn stop_grace(&self) -> Option<Duration> {
        self.stop_grace_ms.map(Duration::from_millis)
    }

    pub fn reader_drain(&self) -> Duration {
        Duration::from_millis(self.reader_drain_ms)
    }

    pub fn wordlist_path(&self, name: &str) -> PathBuf {
        self.wordlist_dir.join(name)
    }
}
