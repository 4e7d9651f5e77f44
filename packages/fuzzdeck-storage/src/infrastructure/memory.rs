//! In-memory JobStore
//!
//! Used by tests and by the server when no database path is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::{Document, JobStore, RecordEvents, RecordPatch, RecordWatch};
use crate::{Result, StorageError};

type Key = (String, String);

pub struct MemoryJobStore {
    documents: RwLock<HashMap<Key, Document>>,
    events: RecordEvents,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            events: RecordEvents::new(),
        }
    }

    fn key(collection: &str, job_id: &str) -> Key {
        (collection.to_string(), job_id.to_string())
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, collection: &str, job_id: &str, doc: Document) -> Result<()> {
        {
            let mut documents = self.documents.write();
            let key = Self::key(collection, job_id);
            if documents.contains_key(&key) {
                return Err(StorageError::already_exists(collection, job_id));
            }
            documents.insert(key, doc.clone());
        }
        self.events.publish(collection, job_id, doc);
        Ok(())
    }

    async fn merge_update(
        &self,
        collection: &str,
        job_id: &str,
        patch: RecordPatch,
    ) -> Result<Document> {
        let merged = {
            let mut documents = self.documents.write();
            let doc = documents
                .get_mut(&Self::key(collection, job_id))
                .ok_or_else(|| StorageError::record_not_found(collection, job_id))?;
            patch.apply(doc);
            doc.clone()
        };
        self.events.publish(collection, job_id, merged.clone());
        Ok(merged)
    }

    async fn get(&self, collection: &str, job_id: &str) -> Result<Option<Document>> {
        Ok(self
            .documents
            .read()
            .get(&Self::key(collection, job_id))
            .cloned())
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        let documents = self.documents.read();
        let mut entries: Vec<(&String, &Document)> = documents
            .iter()
            .filter(|((c, _), _)| c == collection)
            .map(|((_, id), doc)| (id, doc))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        Ok(entries.into_iter().map(|(_, doc)| doc.clone()).collect())
    }

    fn watch(&self, collection: &str, job_id: &str) -> RecordWatch {
        self.events.subscribe(collection, job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobRecord, JobStatus};
    use crate::ErrorKind;
    use std::sync::Arc;

    fn record(id: &str) -> Document {
        JobRecord::new(id, "afl", JobStatus::Compiling, Default::default())
            .to_document()
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let store = MemoryJobStore::new();
        store.create("afl_jobs", "afl_1", record("afl_1")).await.unwrap();

        let doc = store.get("afl_jobs", "afl_1").await.unwrap().unwrap();
        let rec = JobRecord::from_document(doc).unwrap();
        assert_eq!(rec.status, JobStatus::Compiling);
        assert!(rec.end_time.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create_fails() {
        let store = MemoryJobStore::new();
        store.create("afl_jobs", "afl_1", record("afl_1")).await.unwrap();
        let err = store
            .create("afl_jobs", "afl_1", record("afl_1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_collections_are_separate_namespaces() {
        let store = MemoryJobStore::new();
        store.create("afl_jobs", "x", record("x")).await.unwrap();
        store.create("zzuf_jobs", "x", record("x")).await.unwrap();
        assert_eq!(store.list("afl_jobs").await.unwrap().len(), 1);
        assert!(store.get("ffuf_jobs", "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_merge_update_missing_record() {
        let store = MemoryJobStore::new();
        let err = store
            .merge_update("afl_jobs", "nope", RecordPatch::new().pid(None))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RecordNotFound);
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_lose_lines() {
        let store = Arc::new(MemoryJobStore::new());
        store.create("afl_jobs", "afl_1", record("afl_1")).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let line = crate::domain::LogLine::system(format!("line {}", i));
                store
                    .merge_update("afl_jobs", "afl_1", RecordPatch::new().append_logs(vec![line], 1000))
                    .await
                    .unwrap();
            }));
        }
        futures_join(tasks).await;

        let doc = store.get("afl_jobs", "afl_1").await.unwrap().unwrap();
        assert_eq!(JobRecord::from_document(doc).unwrap().logs.len(), 20);
    }

    #[tokio::test]
    async fn test_watch_sees_merge() {
        let store = MemoryJobStore::new();
        store.create("afl_jobs", "afl_1", record("afl_1")).await.unwrap();
        let mut watch = store.watch("afl_jobs", "afl_1");

        store
            .merge_update(
                "afl_jobs",
                "afl_1",
                RecordPatch::new().status(JobStatus::Running).pid(Some(99)),
            )
            .await
            .unwrap();

        let snapshot = watch.next().await.unwrap();
        assert_eq!(snapshot["status"], "running");
        assert_eq!(snapshot["pid"], 99);
    }

    async fn futures_join(tasks: Vec<tokio::task::JoinHandle<()>>) {
        for task in tasks {
            task.await.unwrap();
        }
    }
}
