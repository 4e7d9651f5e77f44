//! Partial-field updates
//!
//! A `RecordPatch` is the only way writers change a stored job document.
//! Top-level fields in `set` replace whatever the document held; fields the
//! patch does not mention are left untouched. `append` extends an array field
//! in place and trims it from the front to an optional cap, so concurrent log
//! writers never need a read-modify-write cycle.
//!
//! Status writes are monotonic: a patch never moves `status` backwards along
//! the state machine, and once a document holds a terminal status its
//! `status` and `endTime` are frozen. A terminal document never takes a
//! non-null `pid`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::record::{fields, Document, JobStatus, LogLine};

#[derive(Debug, Clone)]
struct Append {
    field: String,
    values: Vec<Value>,
    cap: Option<usize>,
}

/// Shallow merge update for a job document
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    set: Map<String, Value>,
    appends: Vec<Append>,
}

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a top-level field
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    /// Replace a top-level field with any serializable value
    pub fn set_serialized<T: Serialize>(self, field: impl Into<String>, value: &T) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.set(field, value)
    }

    pub fn status(self, status: JobStatus) -> Self {
        self.set(fields::STATUS, status.as_str())
    }

    pub fn pid(self, pid: Option<u32>) -> Self {
        self.set(fields::PID, pid.map(Value::from).unwrap_or(Value::Null))
    }

    pub fn end_time(self, at: DateTime<Utc>) -> Self {
        self.set(fields::END_TIME, at.to_rfc3339())
    }

    pub fn stats(self, stats: Map<String, Value>) -> Self {
        self.set(fields::STATS, Value::Object(stats))
    }

    pub fn error(self, reason: impl Into<String>) -> Self {
        self.set(fields::ERROR, reason.into())
    }

    /// Stamp `lastUpdated` with the current time
    pub fn touch(self) -> Self {
        self.set(fields::LAST_UPDATED, Utc::now().to_rfc3339())
    }

    /// Append values to an array field, keeping at most `cap` newest entries
    pub fn append(
        mut self,
        field: impl Into<String>,
        values: Vec<Value>,
        cap: Option<usize>,
    ) -> Self {
        if !values.is_empty() {
            self.appends.push(Append {
                field: field.into(),
                values,
                cap,
            });
        }
        self
    }

    pub fn append_logs(self, lines: Vec<LogLine>, cap: usize) -> Self {
        let values = lines
            .iter()
            .filter_map(|line| serde_json::to_value(line).ok())
            .collect();
        self.append(fields::LOGS, values, Some(cap))
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.appends.is_empty()
    }

    /// Value this patch assigns to `field`, if any
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.set.get(field)
    }

    /// Apply the patch to a document in place
    pub fn apply(&self, doc: &mut Document) {
        let frozen = self.status_frozen(doc);
        let terminal = current_status(doc).is_some_and(|s| s.is_terminal());
        for (key, value) in &self.set {
            if frozen && (key == fields::STATUS || key == fields::END_TIME) {
                continue;
            }
            if terminal && key == fields::PID && !value.is_null() {
                debug!(pid = %value, "Ignoring pid write on a terminal record");
                continue;
            }
            doc.insert(key.clone(), value.clone());
        }

        for append in &self.appends {
            let entry = doc
                .entry(append.field.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !entry.is_array() {
                *entry = Value::Array(Vec::new());
            }
            if let Value::Array(items) = entry {
                items.extend(append.values.iter().cloned());
                if let Some(cap) = append.cap {
                    if items.len() > cap {
                        let overflow = items.len() - cap;
                        items.drain(..overflow);
                    }
                }
            }
        }
    }
}

impl RecordPatch {
    fn status_frozen(&self, doc: &Document) -> bool {
        let Some(incoming) = self.set.get(fields::STATUS).and_then(parse_status) else {
            return false;
        };
        let Some(current) = current_status(doc) else {
            return false;
        };

        let frozen = current.is_terminal() || incoming.rank() < current.rank();
        if frozen && incoming != current {
            debug!(
                current = %current,
                incoming = %incoming,
                "Ignoring non-monotonic status write"
            );
        }
        frozen
    }
}

fn current_status(doc: &Document) -> Option<JobStatus> {
    doc.get(fields::STATUS).and_then(parse_status)
}

fn parse_status(value: &Value) -> Option<JobStatus> {
    serde_json::from_value(value.clone()).ok()
}
