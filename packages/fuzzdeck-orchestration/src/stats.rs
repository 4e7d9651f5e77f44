//! Metric normalisation shared by the Progress Sampler and the Output Stream
//! Parser.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Number, Value};

/// Lowercase, with every whitespace run collapsed to `_`
pub fn normalize_key(key: &str) -> String {
    key.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// Numeric text becomes a JSON number, anything else stays a string
pub fn coerce_value(raw: &str) -> Value {
    let raw = raw.trim();
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    match raw.parse::<f64>().ok().and_then(Number::from_f64) {
        Some(num) => Value::Number(num),
        None => Value::String(raw.to_string()),
    }
}

/// Parse a `key : value` per line progress file.
///
/// Keys are kept in their original (trimmed) form and, when different, also
/// in normalised form. Lines without a separator are skipped.
pub fn parse_progress(text: &str) -> Map<String, Value> {
    let mut stats = Map::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = coerce_value(value);
        let normalized = normalize_key(key);
        if normalized != key {
            stats.insert(normalized, value.clone());
        }
        stats.insert(key.to_string(), value);
    }
    stats
}

/// Number of entries in `dir`, ignoring AFL's `README.txt`. Missing directory
/// counts as zero.
pub async fn count_entries(dir: &Path) -> std::io::Result<u64> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut count = 0;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name() != "README.txt" {
            count += 1;
        }
    }
    Ok(count)
}

fn ansi_pattern() -> Option<&'static Regex> {
    static ANSI: OnceLock<Option<Regex>> = OnceLock::new();
    ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b[()][A-Za-z0-9]").ok())
        .as_ref()
}

/// Remove terminal escape sequences
pub fn strip_ansi(text: &str) -> String {
    match ansi_pattern() {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}
