//! SQLite adapter for JobStore
//!
//! Schema: one `jobs` table keyed by `(collection, job_id)` holding the JSON
//! document as text. Merges run inside an IMMEDIATE transaction so two
//! writers to the same document serialize on the database lock.
//!
//! rusqlite is synchronous; every call hops onto the blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;

use crate::domain::{Document, JobStore, RecordEvents, RecordPatch, RecordWatch};
use crate::{Result, StorageError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    collection TEXT NOT NULL,
    job_id     TEXT NOT NULL,
    doc        TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    PRIMARY KEY (collection, job_id)
);
"#;

pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
    events: RecordEvents,
}

impl SqliteJobStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::with_connection(conn)
    }

    pub fn new_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            events: RecordEvents::new(),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut *guard)
        })
        .await?
    }
}

fn decode(text: &str) -> Result<Document> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        other => Err(StorageError::serialization(format!(
            "Stored document is not an object: {}",
            other
        ))),
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, collection: &str, job_id: &str, doc: Document) -> Result<()> {
        let (c, id) = (collection.to_string(), job_id.to_string());
        let text = serde_json::to_string(&doc)?;
        self.blocking(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO jobs (collection, job_id, doc) VALUES (?1, ?2, ?3)",
                params![c, id, text],
            )?;
            if inserted == 0 {
                return Err(StorageError::already_exists(&c, &id));
            }
            Ok(())
        })
        .await?;
        self.events.publish(collection, job_id, doc);
        Ok(())
    }

    async fn merge_update(
        &self,
        collection: &str,
        job_id: &str,
        patch: RecordPatch,
    ) -> Result<Document> {
        let (c, id) = (collection.to_string(), job_id.to_string());
        let merged = self
            .blocking(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let current: Option<String> = tx
                    .query_row(
                        "SELECT doc FROM jobs WHERE collection = ?1 AND job_id = ?2",
                        params![c, id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let mut doc = match current {
                    Some(text) => decode(&text)?,
                    None => return Err(StorageError::record_not_found(&c, &id)),
                };

                patch.apply(&mut doc);

                tx.execute(
                    "UPDATE jobs SET doc = ?3, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE collection = ?1 AND job_id = ?2",
                    params![c, id, serde_json::to_string(&doc)?],
                )?;
                tx.commit()?;
                Ok(doc)
            })
            .await?;
        self.events.publish(collection, job_id, merged.clone());
        Ok(merged)
    }

    async fn get(&self, collection: &str, job_id: &str) -> Result<Option<Document>> {
        let (c, id) = (collection.to_string(), job_id.to_string());
        self.blocking(move |conn| {
            let text: Option<String> = conn
                .query_row(
                    "SELECT doc FROM jobs WHERE collection = ?1 AND job_id = ?2",
                    params![c, id],
                    |row| row.get(0),
                )
                .optional()?;
            text.as_deref().map(decode).transpose()
        })
        .await
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        let c = collection.to_string();
        self.blocking(move |conn| {
            let mut stmt =
                conn.prepare("SELECT doc FROM jobs WHERE collection = ?1 ORDER BY job_id")?;
            let rows = stmt.query_map(params![c], |row| row.get::<_, String>(0))?;
            let mut docs = Vec::new();
            for row in rows {
                docs.push(decode(&row?)?);
            }
            Ok(docs)
        })
        .await
    }

    fn watch(&self, collection: &str, job_id: &str) -> RecordWatch {
        self.events.subscribe(collection, job_id)
    }
}
