//! Submission input: form fields plus uploaded files, as received from the
//! HTTP surface (multipart or JSON).

use std::collections::HashMap;
use std::str::FromStr;

use serde_json::Value;

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Submission {
    fields: HashMap<String, String>,
    files: HashMap<String, UploadedFile>,
}

impl Submission {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_field(name, value);
        self
    }

    pub fn with_file(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        self.insert_file(name, UploadedFile::new(filename, bytes));
        self
    }

    pub fn insert_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    /// File parts without a file name are ignored
    pub fn insert_file(&mut self, name: impl Into<String>, file: UploadedFile) {
        if !file.filename.trim().is_empty() {
            self.files.insert(name.into(), file);
        }
    }

    /// Build from a JSON body. One level of nested objects (e.g. an
    /// `options` object) is flattened; top-level keys win on conflict.
    pub fn from_json(body: &Value) -> Result<Self> {
        let Value::Object(map) = body else {
            return Err(OrchestratorError::validation("Request body must be a JSON object"));
        };

        let mut submission = Self::new();
        for (key, value) in map {
            if let Value::Object(nested) = value {
                for (inner_key, inner) in nested {
                    if !map.contains_key(inner_key) {
                        if let Some(text) = scalar_text(inner) {
                            submission.insert_field(inner_key.clone(), text);
                        }
                    }
                }
            } else if let Some(text) = scalar_text(value) {
                submission.insert_field(key.clone(), text);
            }
        }
        Ok(submission)
    }

    /// Trimmed, non-empty field value
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn require(&self, name: &str, message: &str) -> Result<&str> {
        self.field(name)
            .ok_or_else(|| OrchestratorError::validation(message))
    }

    /// Parse a field, falling back to `default` when absent
    pub fn parse_or<T: FromStr>(&self, name: &str, default: T) -> Result<T> {
        match self.field(name) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|_| OrchestratorError::validation(format!("Invalid {}: {}", name, raw))),
        }
    }

    pub fn parse_opt<T: FromStr>(&self, name: &str) -> Result<Option<T>> {
        match self.field(name) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| OrchestratorError::validation(format!("Invalid {}: {}", name, raw))),
        }
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(
            self.field(name).map(str::to_ascii_lowercase).as_deref(),
            Some("true" | "1" | "on" | "yes")
        )
    }

    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files.get(name)
    }

    pub fn take_file(&mut self, name: &str) -> Option<UploadedFile> {
        self.files.remove(name)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
