use fuzzdeck_storage::{ErrorKind, StorageError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Rejected before any job record exists
    #[error("Validation error: {0}")]
    Validation(String),

    /// The tool binary could not be started
    #[error("Launch failed: {0}")]
    Launch(String),

    #[error("Compilation failed: {0}")]
    CompileFailed(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn validation<E: std::fmt::Display>(e: E) -> Self {
        Self::Validation(e.to_string())
    }

    pub fn launch<E: std::fmt::Display>(e: E) -> Self {
        Self::Launch(e.to_string())
    }

    pub fn parse<E: std::fmt::Display>(e: E) -> Self {
        Self::Parse(e.to_string())
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            OrchestratorError::Validation(_)
            | OrchestratorError::CompileFailed(_)
            | OrchestratorError::JobNotFound(_)
            | OrchestratorError::InvalidStateTransition { .. }
            | OrchestratorError::ArtifactNotFound(_)
            | OrchestratorError::Parse(_)
            | OrchestratorError::Config(_) => ErrorCategory::Permanent,
            OrchestratorError::Storage(e) => match e.kind {
                ErrorKind::Database | ErrorKind::IO => ErrorCategory::Transient,
                ErrorKind::Archive => ErrorCategory::Infrastructure,
                _ => ErrorCategory::Permanent,
            },
            OrchestratorError::Launch(_)
            | OrchestratorError::Io(_)
            | OrchestratorError::Other(_) => ErrorCategory::Infrastructure,
        }
    }

    /// HTTP-equivalent status for user-facing operations
    pub fn status_code(&self) -> u16 {
        match self {
            OrchestratorError::Validation(_) | OrchestratorError::Parse(_) => 400,
            OrchestratorError::JobNotFound(_) | OrchestratorError::ArtifactNotFound(_) => 404,
            OrchestratorError::InvalidStateTransition { .. } => 409,
            OrchestratorError::CompileFailed(_) => 422,
            OrchestratorError::Storage(e) => match e.kind {
                ErrorKind::RecordNotFound | ErrorKind::ArtifactNotFound => 404,
                ErrorKind::AlreadyExists => 409,
                ErrorKind::InvalidPath => 400,
                _ => 500,
            },
            OrchestratorError::Launch(_)
            | OrchestratorError::Io(_)
            | OrchestratorError::Config(_)
            | OrchestratorError::Other(_) => 500,
        }
    }
}

/// Error category for logging and HTTP mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Transient error (e.g., database busy)
    Transient,
    /// Permanent error (e.g., invalid input, compile failure)
    Permanent,
    /// Infrastructure error (e.g., tool binary missing, disk full)
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "transient" => Ok(ErrorCategory::Transient),
            "permanent" => Ok(ErrorCategory::Permanent),
            "infrastructure" => Ok(ErrorCategory::Infrastructure),
            _ => Err(OrchestratorError::parse(format!(
                "Invalid error category: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
