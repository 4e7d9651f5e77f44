//! Artifact store
//!
//! Filesystem area holding uploaded inputs and tool outputs, namespaced per
//! job:
//!
//! ```text
//! <root>/uploads/<job_id>/<job_id>_<file>     uploaded primary input
//! <root>/uploads/<job_id>/input/<seed>        seed corpus
//! <root>/results/<job_id>/...                 tool output
//! ```
//!
//! Filesystem errors surface to the caller unchanged; nothing is retried.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::{Result, StorageError};

/// Per-job directories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    pub job_id: String,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl JobPaths {
    /// Seed corpus directory inside the upload area
    pub fn seed_dir(&self) -> PathBuf {
        self.upload_dir.join("input")
    }
}

/// An uploaded file as persisted
#[derive(Debug, Clone)]
pub struct StoredInput {
    pub path: PathBuf,
    pub original_name: String,
    pub stored_name: String,
    pub size: u64,
    pub sha256: String,
}

/// One file inside a zip bundle
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Name inside the archive
    pub name: String,
    /// Path relative to the job's output directory
    pub relative_path: String,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directories for a job, without touching the filesystem
    pub fn paths(&self, job_id: &str) -> Result<JobPaths> {
        let job_id = checked_component(job_id)?;
        Ok(JobPaths {
            job_id: job_id.to_string(),
            upload_dir: self.root.join("uploads").join(job_id),
            output_dir: self.root.join("results").join(job_id),
        })
    }

    /// Create the job's directories. Safe to call repeatedly.
    pub fn allocate(&self, job_id: &str) -> Result<JobPaths> {
        let paths = self.paths(job_id)?;
        std::fs::create_dir_all(&paths.upload_dir)?;
        std::fs::create_dir_all(&paths.output_dir)?;
        debug!(job_id, upload_dir = %paths.upload_dir.display(), "Allocated artifact dirs");
        Ok(paths)
    }

    /// Remove a job's directories. Missing directories are not an error.
    pub fn discard(&self, job_id: &str) -> Result<()> {
        let paths = self.paths(job_id)?;
        for dir in [&paths.upload_dir, &paths.output_dir] {
            match std::fs::remove_dir_all(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(job_id, "Discarded artifact dirs");
        Ok(())
    }

    /// Persist an uploaded primary input as `<job_id>_<filename>`
    pub fn write_input(&self, job_id: &str, filename: &str, bytes: &[u8]) -> Result<StoredInput> {
        let paths = self.allocate(job_id)?;
        let original_name = sanitize_filename(filename)?;
        let stored_name = format!("{}_{}", job_id, original_name);
        let path = paths.upload_dir.join(&stored_name);
        std::fs::write(&path, bytes)?;

        Ok(StoredInput {
            path,
            original_name,
            stored_name,
            size: bytes.len() as u64,
            sha256: format!("{:x}", Sha256::digest(bytes)),
        })
    }

    /// Persist a seed file into the job's seed corpus directory
    pub fn write_seed(&self, job_id: &str, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        let paths = self.allocate(job_id)?;
        let dir = paths.seed_dir();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(sanitize_filename(filename)?);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    /// File names directly under `<output_dir>/<subdir>` matching `pattern`,
    /// sorted. A missing directory yields an empty list.
    pub fn list_outputs(
        &self,
        job_id: &str,
        subdir: &str,
        pattern: Option<&Regex>,
    ) -> Result<Vec<String>> {
        let dir = self.resolve(job_id, subdir)?;
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if pattern.map_or(true, |re| re.is_match(&name)) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Every file below `<output_dir>/<subdir>`, as paths relative to the
    /// output directory, sorted.
    pub fn list_tree(&self, job_id: &str, subdir: &str) -> Result<Vec<String>> {
        let paths = self.paths(job_id)?;
        let dir = self.resolve(job_id, subdir)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&dir).follow_links(false) {
            let entry = entry.map_err(|e| {
                StorageError::new(crate::ErrorKind::IO, format!("Walk failed: {}", e))
            })?;
            if entry.file_type().is_file() {
                if let Ok(rel) = entry.path().strip_prefix(&paths.output_dir) {
                    files.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Read one output file
    pub fn read_file(&self, job_id: &str, relative_path: &str) -> Result<Vec<u8>> {
        let path = self.resolve(job_id, relative_path)?;
        if !path.is_file() {
            return Err(StorageError::artifact_not_found(relative_path));
        }
        Ok(std::fs::read(path)?)
    }

    /// Zip the given output files into an in-memory archive
    pub fn bundle_as_archive(&self, job_id: &str, entries: &[ArchiveEntry]) -> Result<Vec<u8>> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);

        for entry in entries {
            let bytes = self.read_file(job_id, &entry.relative_path)?;
            writer.start_file(entry.name.clone(), options)?;
            writer.write_all(&bytes)?;
        }

        let cursor = writer.finish()?;
        debug!(job_id, files = entries.len(), "Bundled artifact archive");
        Ok(cursor.into_inner())
    }

    /// Resolve a path relative to the job's output directory, refusing
    /// anything that would escape it.
    pub fn resolve(&self, job_id: &str, relative: &str) -> Result<PathBuf> {
        let paths = self.paths(job_id)?;
        let rel = Path::new(relative);
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(StorageError::invalid_path(format!(
                        "Path escapes output directory: {}",
                        relative
                    )))
                }
            }
        }
        Ok(paths.output_dir.join(rel))
    }
}

fn checked_component(job_id: &str) -> Result<&str> {
    let valid = !job_id.is_empty()
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(job_id)
    } else {
        Err(StorageError::invalid_path(format!("Invalid job id: {:?}", job_id)))
    }
}

/// Reduce an uploaded file name to a single safe path component
pub fn sanitize_filename(filename: &str) -> Result<String> {
    let base = filename
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        return Err(StorageError::invalid_path(format!(
            "Invalid file name: {:?}",
            filename
        )));
    }
    Ok(base.to_string())
}
