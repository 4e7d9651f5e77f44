//! Domain layer for the job record store
//!
//! # Domain Models
//!
//! - `JobRecord`: typed view of a job document (every field defaults)
//! - `RecordPatch`: shallow merge update with bounded array appends
//! - `JobStatus`, `LogLine`, `ArtifactRefs`
//!
//! # Port Trait
//!
//! - `JobStore`: create / merge_update / get / list / watch
//!
//! # Examples
//!
//! ```rust,ignore
//! use fuzzdeck_storage::domain::{JobRecord, JobStatus, JobStore, RecordPatch};
//!
//! async fn example(store: impl JobStore) -> fuzzdeck_storage::Result<()> {
//!     let record = JobRecord::new("afl_1", "afl", JobStatus::Compiling, Default::default());
//!     store.create("afl_jobs", "afl_1", record.to_document()?).await?;
//!
//!     store
//!         .merge_update("afl_jobs", "afl_1", RecordPatch::new().status(JobStatus::Running).pid(Some(42)))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod patch;
pub mod record;
pub mod store;

pub use patch::RecordPatch;
pub use record::{fields, ArtifactRefs, Document, JobRecord, JobStatus, LogKind, LogLine};
pub use store::{JobStore, RecordEvent, RecordEvents, RecordWatch};
