//! wfuzz adapter
//!
//! wfuzz's `-f` output has changed format across releases, so results are
//! read with a cascade of line patterns: the first pattern that yields any
//! hit wins, then a whitespace-split fallback, then the raw text itself.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use fuzzdeck_storage::{fields, RecordPatch};
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::afl::into_map;
use super::ffuf::FUZZ_KEYWORD;
use super::{read_optional, FinalContext, PrepareContext, PreparedJob, ToolMonitor};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::stats::strip_ansi;
use crate::submission::Submission;
use crate::supervisor::LaunchSpec;

const DEFAULT_HIDE_CODES: &str = "404,500";

#[derive(Debug)]
pub struct WfuzzParams {
    target: String,
    wordlist: String,
    wordlist_path: PathBuf,
    hide_codes: String,
    follow_redirects: bool,
    delay: Option<f64>,
    threads: Option<u32>,
}

fn hide_codes_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{3}(,\d{3})*$").ok()).as_ref()
}

impl WfuzzParams {
    pub fn validate(submission: Submission, config: &OrchestratorConfig) -> Result<Self> {
        let target = submission.field("target").filter(|t| t.contains(FUZZ_KEYWORD));
        let wordlist = submission.field("wordlist");
        let (Some(target), Some(wordlist)) = (target, wordlist) else {
            return Err(OrchestratorError::validation(
                "Invalid parameters: target must contain FUZZ and wordlist must be provided",
            ));
        };

        if wordlist.contains(['/', '\\']) || wordlist == ".." || wordlist == "." {
            return Err(OrchestratorError::validation(format!(
                "Invalid wordlist name: {}",
                wordlist
            )));
        }
        let wordlist_path = config.wordlist_path(wordlist);
        if !wordlist_path.is_file() {
            return Err(OrchestratorError::ArtifactNotFound(format!(
                "Wordlist \"{}\" not found in wordlists directory",
                wordlist
            )));
        }

        let hide_codes = submission
            .field("hideCodes")
            .unwrap_or(DEFAULT_HIDE_CODES)
            .to_string();
        if !hide_codes_pattern().map_or(false, |re| re.is_match(&hide_codes)) {
            return Err(OrchestratorError::validation(format!(
                "Invalid hideCodes: {}",
                hide_codes
            )));
        }

        let delay = submission.parse_opt::<f64>("delay")?;
        if delay.map_or(false, |d| !d.is_finite() || d < 0.0) {
            return Err(OrchestratorError::validation("delay must be a non-negative number"));
        }
        let threads = submission.parse_opt::<u32>("threads")?;
        if threads == Some(0) {
            return Err(OrchestratorError::validation("threads must be at least 1"));
        }

        Ok(Self {
            target: target.to_string(),
            wordlist: wordlist.to_string(),
            wordlist_path,
            hide_codes,
            follow_redirects: submission.flag("followRedirects"),
            delay,
            threads,
        })
    }

    pub fn prepare(self, ctx: &PrepareContext<'_>) -> Result<PreparedJob> {
        let output = ctx.paths.output_dir.join(file_name(ctx.job_id));
        let mut launch = LaunchSpec::new(&ctx.config.binaries.wfuzz).args([
            "-w".to_string(),
            self.wordlist_path.display().to_string(),
            "-u".to_string(),
            self.target.clone(),
            "-f".to_string(),
            output.display().to_string(),
            "--hc".to_string(),
            self.hide_codes.clone(),
        ]);
        if self.follow_redirects {
            launch = launch.arg("--follow");
        }
        if let Some(delay) = self.delay {
            launch = launch.arg("-s").arg(delay.to_string());
        }
        if let Some(threads) = self.threads {
            launch = launch.arg("-t").arg(threads.to_string());
        }
        launch = launch.arg("-v");

        let mut artifacts = ctx.base_refs();
        artifacts.files = vec![file_name(ctx.job_id)];

        Ok(PreparedJob {
            parameters: into_map(json!({
                "target": self.target,
                "wordlist": self.wordlist,
                "options": {
                    "hideCodes": self.hide_codes,
                    "followRedirects": self.follow_redirects,
                    "delay": self.delay,
                    "threads": self.threads,
                },
                "command": launch.command_line(),
            })),
            artifacts,
            build: None,
            launch,
            monitor: Arc::new(WfuzzMonitor {
                output,
                target: self.target,
            }),
        })
    }
}

pub fn file_name(job_id: &str) -> String {
    format!("{}_results.txt", job_id)
}

/// One parsed result line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WfuzzHit {
    pub id: String,
    pub status: String,
    pub lines: String,
    pub words: String,
    pub chars: String,
    pub payload: String,
    pub url: String,
}

impl WfuzzHit {
    fn new(target: &str, parts: [&str; 5], payload: &str) -> Self {
        let payload = payload.replace('"', "");
        Self {
            id: parts[0].to_string(),
            status: parts[1].to_string(),
            lines: parts[2].to_string(),
            words: parts[3].to_string(),
            chars: parts[4].to_string(),
            url: target.replacen(FUZZ_KEYWORD, &payload, 1),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WfuzzResults {
    Hits(Vec<WfuzzHit>),
    /// Nothing matched; the cleaned output is kept as-is
    Raw(String),
}

impl WfuzzResults {
    pub fn to_value(&self) -> Value {
        match self {
            WfuzzResults::Hits(hits) => json!(hits),
            WfuzzResults::Raw(raw) => json!([{
                "note": "Raw output could not be parsed",
                "rawOutput": raw,
            }]),
        }
    }

    pub fn stats(&self) -> Map<String, Value> {
        let (total, successful) = match self {
            WfuzzResults::Hits(hits) => (
                hits.len(),
                hits.iter().filter(|h| h.status == "200").count(),
            ),
            WfuzzResults::Raw(_) => (1, 0),
        };
        let mut stats = Map::new();
        stats.insert("totalRequests".to_string(), json!(total));
        stats.insert("successful".to_string(), json!(successful));
        stats
    }
}

fn line_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r#"(?m)^(\d+):?\s+C=(\d{3})\s+(\d+)\s+L\s+(\d+)\s+W\s+(\d+)\s+Ch\s+"([^"]+)""#,
            r#"(?m)^(\d+):?\s+(\d{3})\s+(\d+)\s+(\d+)\s+(\d+)\s+"([^"]+)""#,
            r"(?m)^(\d+):?\s+(\d{3})\s+(\d+)\s+(\d+)\s+(\d+)\s+(.*)$",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn split_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\d+:?\s+\d{3}\s+").ok()).as_ref()
}

pub fn parse_output(raw: &str, target: &str) -> WfuzzResults {
    let cleaned = strip_ansi(raw);

    for pattern in line_patterns() {
        let hits: Vec<WfuzzHit> = pattern
            .captures_iter(&cleaned)
            .map(|c| {
                let group = |i: usize| c.get(i).map_or("", |m| m.as_str());
                WfuzzHit::new(
                    target,
                    [group(1), group(2), group(3), group(4), group(5)],
                    group(6).trim_end_matches('\r'),
                )
            })
            .collect();
        if !hits.is_empty() {
            return WfuzzResults::Hits(hits);
        }
    }

    let hits = split_fallback(&cleaned, target);
    if hits.is_empty() {
        WfuzzResults::Raw(cleaned)
    } else {
        WfuzzResults::Hits(hits)
    }
}

/// `ID  code  N L  N W  N Ch  "payload"` split on whitespace
fn split_fallback(cleaned: &str, target: &str) -> Vec<WfuzzHit> {
    let Some(filter) = split_pattern() else {
        return Vec::new();
    };
    cleaned
        .lines()
        .filter(|line| filter.is_match(line))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 7 {
                return None;
            }
            let mut rest = &parts[7..];
            if rest.first() == Some(&"Ch") {
                rest = &rest[1..];
            }
            Some(WfuzzHit::new(
                target,
                [
                    parts[0].trim_end_matches(':'),
                    parts[1],
                    parts[2],
                    parts[4],
                    parts[6],
                ],
                &rest.join(" "),
            ))
        })
        .collect()
}

struct WfuzzMonitor {
    output: PathBuf,
    target: String,
}

#[async_trait]
impl ToolMonitor for WfuzzMonitor {
    async fn finalize(&self, _ctx: &FinalContext) -> Result<RecordPatch> {
        let Some(raw) = read_optional(&self.output).await? else {
            return Ok(RecordPatch::new());
        };
        let results = parse_output(&raw, &self.target);
        Ok(RecordPatch::new()
            .stats(results.stats())
            .set(fields::RESULTS, results.to_value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: &str = "http://x/FUZZ";

    fn config_with_wordlist(dir: &std::path::Path) -> OrchestratorConfig {
        std::fs::write(dir.join("common.txt"), "admin\n").unwrap();
        OrchestratorConfig {
            wordlist_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validation_messages() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_wordlist(dir.path());

        let err = WfuzzParams::validate(Submission::new().with_field("target", TARGET), &config)
            .unwrap_err();
        assert_eq!(err.status_code(), 400);

        let err = WfuzzParams::validate(
            Submission::new()
                .with_field("target", TARGET)
                .with_field("wordlist", "missing.txt"),
            &config,
        )
        .unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert!(err.to_string().contains("\"missing.txt\" not found"));

        let err = WfuzzParams::validate(
            Submission::new()
                .with_field("target", TARGET)
                .with_field("wordlist", "common.txt")
                .with_field("hideCodes", "404;rm"),
            &config,
        )
        .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_prepare_builds_options() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_wordlist(dir.path());
        let store = fuzzdeck_storage::ArtifactStore::new(dir.path().join("data"));
        let paths = store.allocate("wfuzz_1").unwrap();
        let ctx = PrepareContext {
            job_id: "wfuzz_1",
            paths: &paths,
            artifacts: &store,
            config: &config,
        };
        let submission = Submission::new()
            .with_field("target", TARGET)
            .with_field("wordlist", "common.txt")
            .with_field("followRedirects", "true")
            .with_field("threads", "4");
        let prepared = WfuzzParams::validate(submission, &config)
            .unwrap()
            .prepare(&ctx)
            .unwrap();

        let args = prepared.launch.args;
        assert_eq!(&args[6..8], ["--hc", "404,500"]);
        assert!(args.contains(&"--follow".to_string()));
        assert!(!args.contains(&"-s".to_string()));
        assert_eq!(&args[args.len() - 3..], ["-t", "4", "-v"]);
    }

    #[test]
    fn test_parse_first_matching_pattern() {
        let raw = "\x1b[32m00001  C=200   7 L   12 W   100 Ch  \"admin\"\x1b[0m\n\
                   00002  C=301   1 L    2 W    10 Ch  \"login\"\n";
        let WfuzzResults::Hits(hits) = parse_output(raw, TARGET) else {
            panic!("expected hits");
        };
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].status, "200");
        assert_eq!(hits[0].url, "http://x/admin");
        assert_eq!(hits[1].chars, "10");
    }

    #[test]
    fn test_parse_plain_columns() {
        let raw = "12 200 3 4 5 \"backup\"\n";
        let WfuzzResults::Hits(hits) = parse_output(raw, TARGET) else {
            panic!("expected hits");
        };
        assert_eq!(hits[0].payload, "backup");
        assert_eq!(hits[0].lines, "3");
    }

    #[test]
    fn test_parse_current_wfuzz_layout() {
        let raw = "000000001:   200        7 L      12 W       100 Ch      \"admin\"\n\
                   000000002:   403        1 L       2 W        10 Ch      \"secret\"\n";
        let results = parse_output(raw, TARGET);
        let WfuzzResults::Hits(hits) = &results else {
            panic!("expected hits");
        };
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "000000001");
        assert_eq!(hits[0].words, "12");
        assert_eq!(hits[0].chars, "100");
        assert_eq!(hits[0].payload, "admin");
        assert_eq!(hits[1].url, "http://x/secret");

        let stats = results.stats();
        assert_eq!(stats["totalRequests"], 2);
        assert_eq!(stats["successful"], 1);
    }

    #[test]
    fn test_unparseable_output_is_kept_raw() {
        let results = parse_output("Target: http://x/FUZZ\nTotal requests: 0\n", TARGET);
        assert!(matches!(results, WfuzzResults::Raw(_)));
        let value = results.to_value();
        assert_eq!(value[0]["note"], "Raw output could not be parsed");
        assert_eq!(results.stats()["successful"], 0);
    }
}
