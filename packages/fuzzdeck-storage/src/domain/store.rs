//! Job record store port
//!
//! Records are keyed by `(collection, job_id)`; each tool writes to its own
//! collection. Every successful write is published to watchers, so the
//! subscribe path never diverges from the point-read path.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::patch::RecordPatch;
use super::record::Document;
use crate::Result;

/// Capacity of the change-notification channel shared by all watchers
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Primary storage abstraction for job documents
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new document. Fails with `AlreadyExists` when the key is taken.
    async fn create(&self, collection: &str, job_id: &str, doc: Document) -> Result<()>;

    /// Shallow-merge `patch` into an existing document and return the result.
    /// Fails with `RecordNotFound` when no document exists.
    async fn merge_update(
        &self,
        collection: &str,
        job_id: &str,
        patch: RecordPatch,
    ) -> Result<Document>;

    /// Point read
    async fn get(&self, collection: &str, job_id: &str) -> Result<Option<Document>>;

    /// All documents in a collection
    async fn list(&self, collection: &str) -> Result<Vec<Document>>;

    /// Subscribe to snapshots of one document
    fn watch(&self, collection: &str, job_id: &str) -> RecordWatch;
}

/// A document snapshot emitted after a successful write
#[derive(Debug, Clone)]
pub struct RecordEvent {
    pub collection: String,
    pub job_id: String,
    pub document: Arc<Document>,
}

/// Fan-out of write notifications, shared by store adapters
#[derive(Debug, Clone)]
pub struct RecordEvents {
    tx: broadcast::Sender<RecordEvent>,
}

impl RecordEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, collection: &str, job_id: &str, document: Document) {
        // No receivers is fine; nobody is watching.
        let _ = self.tx.send(RecordEvent {
            collection: collection.to_string(),
            job_id: job_id.to_string(),
            document: Arc::new(document),
        });
    }

    pub fn subscribe(&self, collection: &str, job_id: &str) -> RecordWatch {
        RecordWatch {
            rx: self.tx.subscribe(),
            collection: collection.to_string(),
            job_id: job_id.to_string(),
        }
    }
}

impl Default for RecordEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream of snapshots for a single job document
#[derive(Debug)]
pub struct RecordWatch {
    rx: broadcast::Receiver<RecordEvent>,
    collection: String,
    job_id: String,
}

impl RecordWatch {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Next snapshot for this document, or `None` once the store is dropped.
    ///
    /// A lagging watcher skips the snapshots it missed; the next one it
    /// receives is always the latest full document.
    pub async fn next(&mut self) -> Option<Arc<Document>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if event.collection == self.collection && event.job_id == self.job_id {
                        return Some(event.document);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(
                        job_id = %self.job_id,
                        skipped,
                        "Record watcher lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
