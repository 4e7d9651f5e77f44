//! Output Stream Parser
//!
//! Turns a child's stdout into log lines and structured status blocks.
//! Tools that redraw a pseudo-UI print sections separated by a run of
//! marker characters:
//!
//! ```text
//! ______
//! process timing
//!   run time : 0 days, 0 hrs, 1 min
//!   last new find : none yet
//! ______
//! overall results
//!   cycles done : 7
//! ______
//! ```
//!
//! Each section between two markers is parsed into `{section}_{key}` pairs
//! (both normalised). Text after the last marker stays buffered until the
//! next marker arrives, so a partial section is never parsed. Parsed blocks
//! are emitted at most once per throttle interval; blocks arriving in
//! between are merged and held until the interval elapses or the stream ends.

use std::time::{Duration, Instant};

use fuzzdeck_storage::LogLine;
use serde_json::{Map, Value};

use crate::stats::{coerce_value, normalize_key, strip_ansi};

/// Upper bound on buffered text without a marker
const MAX_BLOCK_BUFFER: usize = 64 * 1024;

/// Longest line kept before it is force-split
const MAX_LINE_LEN: usize = 16 * 1024;

const ERROR_MARKERS: [&str; 4] = ["error", "[-]", "program abort", "fatal"];

pub fn has_error_marker(line: &str) -> bool {
    let lower = line.to_lowercase();
    ERROR_MARKERS.iter().any(|m| lower.contains(m))
}

/// Splits arbitrary chunks into complete lines.
///
/// Bytes are decoded as UTF-8 across chunk boundaries; invalid sequences are
/// replaced. Carriage returns end a line too, since progress UIs redraw with
/// them.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending_bytes: Vec<u8>,
    partial: String,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk; returns the decoded text and every line it completed
    pub fn push(&mut self, bytes: &[u8]) -> (String, Vec<String>) {
        self.pending_bytes.extend_from_slice(bytes);
        let text = self.decode();

        let mut lines = Vec::new();
        for ch in text.chars() {
            if ch == '\n' || ch == '\r' {
                let line = std::mem::take(&mut self.partial);
                if !line.trim().is_empty() {
                    lines.push(line);
                }
            } else {
                self.partial.push(ch);
                if self.partial.len() >= MAX_LINE_LEN {
                    lines.push(std::mem::take(&mut self.partial));
                }
            }
        }
        (text, lines)
    }

    /// Flush whatever is left as a final line
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending_bytes.is_empty() {
            let rest = String::from_utf8_lossy(&self.pending_bytes).into_owned();
            self.pending_bytes.clear();
            self.partial.push_str(&rest);
        }
        let line = std::mem::take(&mut self.partial);
        (!line.trim().is_empty()).then_some(line)
    }

    fn decode(&mut self) -> String {
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending_bytes.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending_bytes[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end; wait for more bytes
                        None => {
                            self.pending_bytes.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending_bytes.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }
}

/// What one chunk produced
#[derive(Debug, Default, PartialEq)]
pub struct ParsedOutput {
    pub lines: Vec<LogLine>,
    pub block: Option<Map<String, Value>>,
}

impl ParsedOutput {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.block.is_none()
    }
}

/// Incremental stdout parser
#[derive(Debug)]
pub struct StreamParser {
    marker: String,
    throttle: Duration,
    parse_blocks: bool,
    lines: LineSplitter,
    buffer: String,
    // Buffer starts right after a marker, so its head is a section start
    anchored: bool,
    last_emit: Option<Instant>,
    held: Option<Map<String, Value>>,
}

impl StreamParser {
    pub fn new(marker: impl Into<String>, throttle: Duration) -> Self {
        Self {
            marker: marker.into(),
            throttle,
            parse_blocks: true,
            lines: LineSplitter::new(),
            buffer: String::new(),
            anchored: false,
            last_emit: None,
            held: None,
        }
    }

    /// Parser that only produces log lines
    pub fn lines_only() -> Self {
        Self {
            parse_blocks: false,
            ..Self::new("______", Duration::ZERO)
        }
    }

    pub fn feed(&mut self, chunk: &[u8], now: Instant) -> ParsedOutput {
        let (text, lines) = self.lines.push(chunk);
        let lines = lines
            .into_iter()
            .map(|line| {
                let line = strip_ansi(&line);
                let error = has_error_marker(&line);
                LogLine::stdout(line, error)
            })
            .collect();

        let block = if self.parse_blocks {
            self.buffer.push_str(&strip_ansi(&text));
            if let Some(parsed) = self.take_complete_sections() {
                merge_into(&mut self.held, parsed);
            }
            if self.buffer.len() > MAX_BLOCK_BUFFER {
                self.truncate_buffer();
            }
            self.release(now)
        } else {
            None
        };

        ParsedOutput { lines, block }
    }

    /// End of stream: flush the trailing line and any held block
    pub fn finish(&mut self) -> ParsedOutput {
        let lines = self
            .lines
            .finish()
            .map(|line| {
                let line = strip_ansi(&line);
                let error = has_error_marker(&line);
                vec![LogLine::stdout(line, error)]
            })
            .unwrap_or_default();
        ParsedOutput {
            lines,
            block: self.held.take(),
        }
    }

    fn release(&mut self, now: Instant) -> Option<Map<String, Value>> {
        self.held.as_ref()?;
        let due = self
            .last_emit
            .map_or(true, |last| now.duration_since(last) >= self.throttle);
        if due {
            self.last_emit = Some(now);
            self.held.take()
        } else {
            None
        }
    }

    fn take_complete_sections(&mut self) -> Option<Map<String, Value>> {
        let marker = self.marker.as_str();
        let last = self.buffer.rfind(marker)?;

        let complete = &self.buffer[..last];
        let mut sections: Vec<&str> = complete.split(marker).collect();
        if !self.anchored && !sections.is_empty() {
            // Text before the first marker started mid-section
            sections.remove(0);
        }

        let mut parsed = Map::new();
        for section in sections {
            parse_section(section, marker, &mut parsed);
        }

        self.buffer = self.buffer[last + marker.len()..].to_string();
        self.anchored = true;
        (!parsed.is_empty()).then_some(parsed)
    }

    fn truncate_buffer(&mut self) {
        let mut cut = self.buffer.len() - MAX_BLOCK_BUFFER / 2;
        while !self.buffer.is_char_boundary(cut) {
            cut += 1;
        }
        self.buffer.drain(..cut);
        self.anchored = false;
    }
}

fn parse_section(section: &str, marker: &str, out: &mut Map<String, Value>) {
    // Leftovers of a marker run longer than the marker itself
    let is_marker_char = |c: char| marker.contains(c);
    let mut lines = section
        .lines()
        .map(|line| line.trim_matches(is_marker_char))
        .filter(|line| !line.trim().is_empty());
    let Some(title) = lines.next() else {
        return;
    };
    let title = normalize_key(title);

    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            continue;
        }
        let key = if title.is_empty() {
            normalize_key(key)
        } else {
            format!("{}_{}", title, normalize_key(key))
        };
        out.insert(key, coerce_value(value));
    }
}

fn merge_into(held: &mut Option<Map<String, Value>>, parsed: Map<String, Value>) {
    match held {
        Some(existing) => existing.extend(parsed),
        None => *held = Some(parsed),
    }
}

/// Stderr lines: always tagged as errors, never parsed for blocks
#[derive(Debug, Default)]
pub struct StderrParser {
    lines: LineSplitter,
}

impl StderrParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<LogLine> {
        let (_, lines) = self.lines.push(chunk);
        lines
            .into_iter()
            .map(|line| LogLine::stderr(strip_ansi(&line)))
            .collect()
    }

    pub fn finish(&mut self) -> Option<LogLine> {
        self.lines.finish().map(|line| LogLine::stderr(strip_ansi(&line)))
    }
}
