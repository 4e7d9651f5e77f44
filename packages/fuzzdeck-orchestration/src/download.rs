//! Artifact downloads
//!
//! Resolves a `(tool, job, category)` request to either one output file or
//! a zip bundle of several. Single files lose the `{job_id}_` prefix they
//! were generated with; bundles are named `{job_id}_{category}.zip`.
//!
//! Everything here is blocking filesystem work; the coordinator runs it on
//! the blocking pool.

use fuzzdeck_storage::{sanitize_filename, ArchiveEntry, ArtifactStore};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::tools::{afl, dalfox, ffuf, radamsa, wfuzz, Tool};

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const ZIP: &str = "application/zip";

/// AFL leaves this in `crashes/` and `hangs/`
const AFL_README: &str = "README.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactCategory {
    Crashes,
    Hangs,
    Queue,
    /// Whole AFL output tree
    Full,
    Mutated,
    /// Raw output file of the web tools
    Results,
}

impl ArtifactCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactCategory::Crashes => "crashes",
            ArtifactCategory::Hangs => "hangs",
            ArtifactCategory::Queue => "queue",
            ArtifactCategory::Full => "full",
            ArtifactCategory::Mutated => "mutated",
            ArtifactCategory::Results => "results",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "crashes" => Ok(ArtifactCategory::Crashes),
            "hangs" => Ok(ArtifactCategory::Hangs),
            "queue" => Ok(ArtifactCategory::Queue),
            "full" | "corpus" => Ok(ArtifactCategory::Full),
            "mutated" | "fuzzed" => Ok(ArtifactCategory::Mutated),
            "results" => Ok(ArtifactCategory::Results),
            _ => Err(OrchestratorError::validation(format!(
                "Unknown artifact type: {}",
                s
            ))),
        }
    }

    /// Category used when the request names none
    pub fn default_for(tool: Tool) -> Self {
        match tool {
            Tool::Afl => ArtifactCategory::Crashes,
            Tool::Radamsa | Tool::Zzuf => ArtifactCategory::Mutated,
            Tool::Ffuf | Tool::Dalfox | Tool::Wfuzz => ArtifactCategory::Results,
        }
    }

    /// `is_valid_for` as a validation error
    pub fn ensure_valid_for(&self, tool: Tool) -> Result<()> {
        if self.is_valid_for(tool) {
            return Ok(());
        }
        Err(OrchestratorError::validation(format!(
            "Artifact type '{}' is not available for {}",
            self, tool
        )))
    }

    pub fn is_valid_for(&self, tool: Tool) -> bool {
        match self {
            ArtifactCategory::Crashes
            | ArtifactCategory::Hangs
            | ArtifactCategory::Queue
            | ArtifactCategory::Full => tool == Tool::Afl,
            ArtifactCategory::Mutated => matches!(tool, Tool::Radamsa | Tool::Zzuf),
            ArtifactCategory::Results => matches!(tool, Tool::Ffuf | Tool::Dalfox | Tool::Wfuzz),
        }
    }
}

impl std::fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub category: ArtifactCategory,
    /// Single file selector (radamsa)
    pub file: Option<String>,
}

/// Bytes plus framing for an attachment response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPayload {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl DownloadPayload {
    pub fn content_disposition(&self) -> String {
        format!(
            "attachment; filename=\"{}\"",
            self.file_name.replace(['"', '\\'], "_")
        )
    }
}

/// Drop the internal `{job_id}_` prefix from a generated file name
pub fn strip_job_prefix<'a>(job_id: &str, name: &'a str) -> &'a str {
    name.strip_prefix(job_id)
        .and_then(|rest| rest.strip_prefix('_'))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(name)
}

pub fn resolve_download(
    store: &ArtifactStore,
    tool: Tool,
    job_id: &str,
    request: &DownloadRequest,
) -> Result<DownloadPayload> {
    let category = request.category;
    category.ensure_valid_for(tool)?;

    match (tool, category) {
        (Tool::Afl, ArtifactCategory::Full) => {
            let files = store.list_tree(job_id, ".")?;
            let entries = files
                .into_iter()
                .map(|rel| ArchiveEntry {
                    name: rel.clone(),
                    relative_path: rel,
                })
                .collect();
            archive(store, job_id, category, entries)
        }
        (Tool::Afl, _) => {
            let paths = store.paths(job_id)?;
            let base = if paths.output_dir.join(afl::INSTANCE).is_dir() {
                format!("{}/{}", afl::INSTANCE, category)
            } else {
                category.to_string()
            };
            let entries = store
                .list_outputs(job_id, &base, None)?
                .into_iter()
                .filter(|name| name != AFL_README)
                .map(|name| ArchiveEntry {
                    relative_path: format!("{}/{}", base, name),
                    name,
                })
                .collect();
            archive(store, job_id, category, entries)
        }
        (Tool::Radamsa, _) => match request.file.as_deref() {
            Some(file) => single(store, job_id, &prefixed(job_id, file)?),
            None => {
                let pattern = radamsa::output_pattern(job_id)?;
                let entries = store
                    .list_outputs(job_id, ".", Some(&pattern))?
                    .into_iter()
                    .map(|name| ArchiveEntry {
                        name: strip_job_prefix(job_id, &name).to_string(),
                        relative_path: name,
                    })
                    .collect();
                archive(store, job_id, category, entries)
            }
        },
        (Tool::Zzuf, _) => {
            let pattern = Regex::new(&format!(r"^{}_fuzzed_", regex::escape(job_id)))
                .map_err(OrchestratorError::parse)?;
            let name = store
                .list_outputs(job_id, ".", Some(&pattern))?
                .into_iter()
                .next()
                .ok_or_else(|| OrchestratorError::ArtifactNotFound("Fuzzed file not found".into()))?;
            single(store, job_id, &name)
        }
        (Tool::Ffuf, _) => single(store, job_id, &ffuf::file_name(job_id)),
        (Tool::Dalfox, _) => single(store, job_id, &dalfox::file_name(job_id)),
        (Tool::Wfuzz, _) => single(store, job_id, &wfuzz::file_name(job_id)),
    }
}

/// Accept a file selector with or without the job prefix
fn prefixed(job_id: &str, file: &str) -> Result<String> {
    let file = sanitize_filename(file)?;
    if file.starts_with(&format!("{}_", job_id)) {
        Ok(file)
    } else {
        Ok(format!("{}_{}", job_id, file))
    }
}

fn single(store: &ArtifactStore, job_id: &str, name: &str) -> Result<DownloadPayload> {
    let bytes = store.read_file(job_id, name)?;
    Ok(DownloadPayload {
        file_name: strip_job_prefix(job_id, name).to_string(),
        content_type: OCTET_STREAM,
        bytes,
    })
}

fn archive(
    store: &ArtifactStore,
    job_id: &str,
    category: ArtifactCategory,
    entries: Vec<ArchiveEntry>,
) -> Result<DownloadPayload> {
    if entries.is_empty() {
        return Err(OrchestratorError::ArtifactNotFound(format!(
            "No {} files for job {}",
            category, job_id
        )));
    }
    Ok(DownloadPayload {
        file_name: format!("{}_{}.zip", job_id, category),
        content_type: ZIP,
        bytes: store.bundle_as_archive(job_id, &entries)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        (dir, store)
    }

    fn request(category: ArtifactCategory) -> DownloadRequest {
        DownloadRequest {
            category,
            file: None,
        }
    }

    fn zip_names(bytes: &[u8]) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_strip_job_prefix() {
        assert_eq!(strip_job_prefix("zzuf_1", "zzuf_1_fuzzed_a.png"), "fuzzed_a.png");
        assert_eq!(strip_job_prefix("zzuf_1", "zzuf_12_x"), "zzuf_12_x");
        assert_eq!(strip_job_prefix("zzuf_1", "zzuf_1_"), "zzuf_1_");
    }

    #[test]
    fn test_category_validity() {
        assert!(ArtifactCategory::Crashes.is_valid_for(Tool::Afl));
        assert!(!ArtifactCategory::Crashes.is_valid_for(Tool::Zzuf));
        assert_eq!(ArtifactCategory::default_for(Tool::Wfuzz), ArtifactCategory::Results);
        assert!(ArtifactCategory::from_str("bogus").is_err());

        let (_dir, store) = store();
        store.allocate("zzuf_1").unwrap();
        let err = resolve_download(&store, Tool::Zzuf, "zzuf_1", &request(ArtifactCategory::Queue))
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_afl_crashes_zip_skips_readme() {
        let (_dir, store) = store();
        let paths = store.allocate("afl_1").unwrap();
        let crashes = paths.output_dir.join("main").join("crashes");
        std::fs::create_dir_all(&crashes).unwrap();
        std::fs::write(crashes.join("README.txt"), "x").unwrap();
        std::fs::write(crashes.join("id:000000,sig:11"), "boom").unwrap();

        let payload =
            resolve_download(&store, Tool::Afl, "afl_1", &request(ArtifactCategory::Crashes)).unwrap();
        assert_eq!(payload.file_name, "afl_1_crashes.zip");
        assert_eq!(payload.content_type, ZIP);
        assert_eq!(zip_names(&payload.bytes), vec!["id:000000,sig:11"]);
    }

    #[test]
    fn test_afl_empty_category_is_not_found() {
        let (_dir, store) = store();
        store.allocate("afl_1").unwrap();
        let err = resolve_download(&store, Tool::Afl, "afl_1", &request(ArtifactCategory::Hangs))
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_afl_full_tree() {
        let (_dir, store) = store();
        let paths = store.allocate("afl_1").unwrap();
        let queue = paths.output_dir.join("main").join("queue");
        std::fs::create_dir_all(&queue).unwrap();
        std::fs::write(queue.join("id:000001"), "q").unwrap();
        std::fs::write(paths.output_dir.join("main").join("fuzzer_stats"), "s").unwrap();

        let payload =
            resolve_download(&store, Tool::Afl, "afl_1", &request(ArtifactCategory::Full)).unwrap();
        assert_eq!(
            zip_names(&payload.bytes),
            vec!["main/fuzzer_stats", "main/queue/id:000001"]
        );
    }

    #[test]
    fn test_radamsa_single_and_bundle() {
        let (_dir, store) = store();
        let paths = store.allocate("radamsa_1").unwrap();
        std::fs::write(paths.output_dir.join("radamsa_1_1_a.txt"), "one").unwrap();
        std::fs::write(paths.output_dir.join("radamsa_1_2_a.txt"), "two").unwrap();

        let single = resolve_download(
            &store,
            Tool::Radamsa,
            "radamsa_1",
            &DownloadRequest {
                category: ArtifactCategory::Mutated,
                file: Some("2_a.txt".into()),
            },
        )
        .unwrap();
        assert_eq!(single.file_name, "2_a.txt");
        assert_eq!(single.bytes, b"two");
        assert_eq!(single.content_type, OCTET_STREAM);

        let bundle = resolve_download(
            &store,
            Tool::Radamsa,
            "radamsa_1",
            &request(ArtifactCategory::Mutated),
        )
        .unwrap();
        assert_eq!(bundle.file_name, "radamsa_1_mutated.zip");
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bundle.bytes)).unwrap();
        let mut content = String::new();
        archive
            .by_name("1_a.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "one");
    }

    #[test]
    fn test_radamsa_rejects_traversal_selector() {
        let (_dir, store) = store();
        store.allocate("radamsa_1").unwrap();
        let err = resolve_download(
            &store,
            Tool::Radamsa,
            "radamsa_1",
            &DownloadRequest {
                category: ArtifactCategory::Mutated,
                file: Some("..".into()),
            },
        )
        .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_zzuf_fuzzed_file_name() {
        let (_dir, store) = store();
        let paths = store.allocate("zzuf_1").unwrap();
        std::fs::write(paths.output_dir.join("zzuf_1_fuzzed_img.png"), [1u8, 2]).unwrap();

        let payload =
            resolve_download(&store, Tool::Zzuf, "zzuf_1", &request(ArtifactCategory::Mutated))
                .unwrap();
        assert_eq!(payload.file_name, "fuzzed_img.png");
        assert_eq!(
            payload.content_disposition(),
            "attachment; filename=\"fuzzed_img.png\""
        );
    }

    #[test]
    fn test_web_tool_results_missing() {
        let (_dir, store) = store();
        store.allocate("ffuf_1").unwrap();
        let err = resolve_download(&store, Tool::Ffuf, "ffuf_1", &request(ArtifactCategory::Results))
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
