//! Error types for fuzzdeck-storage

use std::fmt;
use thiserror::Error;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Database errors (SQLite)
    Database,
    /// Serialization/deserialization errors
    Serialization,
    /// Job record not found
    RecordNotFound,
    /// A record with the same key already exists
    AlreadyExists,
    /// Artifact file or directory not found
    ArtifactNotFound,
    /// Path escapes the artifact root or names an invalid file
    InvalidPath,
    /// Archive creation errors
    Archive,
    /// I/O errors
    IO,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Database => "database",
            ErrorKind::Serialization => "serialization",
            ErrorKind::RecordNotFound => "record_not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::ArtifactNotFound => "artifact_not_found",
            ErrorKind::InvalidPath => "invalid_path",
            ErrorKind::Archive => "archive",
            ErrorKind::IO => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn record_not_found(collection: &str, job_id: &str) -> Self {
        Self::new(
            ErrorKind::RecordNotFound,
            format!("Job record not found: {}/{}", collection, job_id),
        )
    }

    pub fn already_exists(collection: &str, job_id: &str) -> Self {
        Self::new(
            ErrorKind::AlreadyExists,
            format!("Job record already exists: {}/{}", collection, job_id),
        )
    }

    pub fn artifact_not_found(what: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::ArtifactNotFound,
            format!("Artifact not found: {}", what.into()),
        )
    }

    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidPath, message)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::RecordNotFound | ErrorKind::ArtifactNotFound
        )
    }
}

// SQLite error conversions
#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::database(format!("SQLite error: {}", err)).with_source(err)
    }
}

// JSON error conversions
impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        let kind = if err.kind() == std::io::ErrorKind::NotFound {
            ErrorKind::ArtifactNotFound
        } else {
            ErrorKind::IO
        };
        StorageError::new(kind, format!("I/O error: {}", err)).with_source(err)
    }
}

impl From<zip::result::ZipError> for StorageError {
    fn from(err: zip::result::ZipError) -> Self {
        StorageError::new(ErrorKind::Archive, format!("Zip error: {}", err)).with_source(err)
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::database(format!("Blocking task failed: {}", err)).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;
