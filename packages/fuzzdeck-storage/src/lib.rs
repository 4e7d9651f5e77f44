//! fuzzdeck-storage - job records and artifact files
//!
//! Two stores back every fuzzing job:
//!
//! 1. **Job record store** (`JobStore`): one JSON document per job, namespaced
//!    by collection (`afl_jobs`, `ffuf_jobs`, ...). Updates are shallow merges
//!    with atomic bounded appends, and every write is published to watchers.
//! 2. **Artifact store** (`ArtifactStore`): per-job upload and output
//!    directories on the filesystem, plus zip bundling for downloads.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fuzzdeck_storage::{ArtifactStore, JobRecord, JobStatus, JobStore, MemoryJobStore, RecordPatch};
//!
//! let store = MemoryJobStore::new();
//! let record = JobRecord::new("zzuf_1", "zzuf", JobStatus::Running, Default::default());
//! store.create("zzuf_jobs", "zzuf_1", record.to_document()?).await?;
//!
//! let mut watch = store.watch("zzuf_jobs", "zzuf_1");
//! store.merge_update("zzuf_jobs", "zzuf_1", RecordPatch::new().status(JobStatus::Completed)).await?;
//! let snapshot = watch.next().await;
//!
//! let artifacts = ArtifactStore::new("./fuzz");
//! let paths = artifacts.allocate("zzuf_1")?;
//! ```

pub mod artifacts;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use artifacts::{sanitize_filename, ArchiveEntry, ArtifactStore, JobPaths, StoredInput};
pub use domain::{
    fields, ArtifactRefs, Document, JobRecord, JobStatus, JobStore, LogKind, LogLine, RecordEvent,
    RecordEvents, RecordPatch, RecordWatch,
};
pub use infrastructure::MemoryJobStore;

#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteJobStore;
