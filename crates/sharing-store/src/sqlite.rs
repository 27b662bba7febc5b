//! SQLite implementation of the DocumentStore trait.
//!
//! This is the persistent backend for documents. It uses rusqlite with
//! bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use sharing_core::{Document, Verb};

use crate::error::{Result, StoreError};
use crate::events::{Event, EventBus};
use crate::migration;
use crate::traits::{
    format_seq, next_rev, parse_seq, push_rev, Change, ChangesFeed, DocumentStore, Selector,
};

/// SQLite-based document store.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
    events: Option<EventBus>,
}

type Emitted = Vec<(Verb, Document, Option<Document>)>;

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            events: None,
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            events: None,
        })
    }

    /// Publish every local write on the given bus.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Run a blocking operation on the connection.
    async fn run_blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }

    fn emit_all(&self, emitted: Emitted) {
        if let Some(events) = &self.events {
            for (verb, doc, old) in emitted {
                events.emit(Event { verb, doc, old });
            }
        }
    }
}

struct StoredRow {
    doc: Document,
    history: Vec<String>,
}

fn decode_body(doctype: &str, body: &str) -> Result<Document> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    Ok(Document::from_value(doctype, value)?)
}

fn encode_history(history: &[String]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(history, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_history(bytes: &[u8]) -> Result<Vec<String>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn load(conn: &Connection, doctype: &str, id: &str) -> Result<Option<StoredRow>> {
    let row: Option<(String, Vec<u8>)> = conn
        .query_row(
            "SELECT body, history FROM documents WHERE doctype = ?1 AND id = ?2",
            params![doctype, id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match row {
        Some((body, history)) => Ok(Some(StoredRow {
            doc: decode_body(doctype, &body)?,
            history: decode_history(&history)?,
        })),
        None => Ok(None),
    }
}

/// Write a document at the head of its doctype's changes feed.
fn put(conn: &Connection, doc: &Document, history: &[String]) -> Result<()> {
    let mut doc = doc.clone();
    doc.remove("_revisions");
    let seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM documents WHERE doctype = ?1",
        params![doc.doctype],
        |row| row.get(0),
    )?;
    let body = serde_json::to_string(&doc.to_value())?;
    conn.execute(
        "INSERT INTO documents (doctype, id, rev, deleted, body, history, seq)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(doctype, id) DO UPDATE SET
            rev = excluded.rev, deleted = excluded.deleted, body = excluded.body,
            history = excluded.history, seq = excluded.seq",
        params![
            doc.doctype,
            doc.id,
            doc.rev_str(),
            doc.is_deleted() as i64,
            body,
            encode_history(history)?,
            seq,
        ],
    )?;
    Ok(())
}

fn create_in(conn: &Connection, doc: &mut Document) -> Result<()> {
    if doc.id.is_empty() {
        doc.id = Uuid::new_v4().simple().to_string();
    }
    let mut history = match load(conn, &doc.doctype, &doc.id)? {
        Some(existing) if !existing.doc.is_deleted() => {
            return Err(StoreError::AlreadyExists(format!("{}/{}", doc.doctype, doc.id)))
        }
        Some(tombstone) => tombstone.history,
        None => Vec::new(),
    };
    doc.remove("_revisions");
    doc.remove("_deleted");
    let rev = next_rev(history.last().map(String::as_str), doc)?;
    push_rev(&mut history, rev.clone());
    doc.rev = Some(rev);
    put(conn, doc, &history)
}

fn update_in(conn: &Connection, doc: &mut Document) -> Result<Document> {
    let existing = match load(conn, &doc.doctype, &doc.id)? {
        Some(existing) if !existing.doc.is_deleted() => existing,
        _ => return Err(StoreError::NotFound(format!("{}/{}", doc.doctype, doc.id))),
    };
    if existing.doc.rev != doc.rev {
        return Err(StoreError::Conflict {
            doctype: doc.doctype.clone(),
            id: doc.id.clone(),
            current: existing.doc.rev_str().to_string(),
        });
    }
    doc.remove("_revisions");
    let mut history = existing.history;
    let rev = next_rev(existing.doc.rev.as_deref(), doc)?;
    push_rev(&mut history, rev.clone());
    doc.rev = Some(rev);
    put(conn, doc, &history)?;
    Ok(existing.doc)
}

fn force_in(conn: &Connection, mut doc: Document) -> Result<Option<(Verb, Document, Option<Document>)>> {
    let Some(rev) = doc.rev.clone() else {
        return Err(StoreError::InvalidData(format!(
            "forced write of {}/{} without revision",
            doc.doctype, doc.id
        )));
    };
    let old = load(conn, &doc.doctype, &doc.id)?.map(|s| s.doc);
    if old.as_ref().and_then(|o| o.rev.as_deref()) == Some(rev.as_str()) {
        return Ok(None);
    }
    let mut history = doc.revisions().unwrap_or_else(|| vec![rev.clone()]);
    if history.last() != Some(&rev) {
        push_rev(&mut history, rev);
    }
    let verb = match (&old, doc.is_deleted()) {
        (_, true) => Verb::Deleted,
        (Some(o), false) if !o.is_deleted() => Verb::Updated,
        _ => Verb::Created,
    };
    doc.remove("_revisions");
    put(conn, &doc, &history)?;
    Ok(Some((verb, doc, old)))
}

fn live_docs(conn: &Connection, doctype: &str) -> Result<Vec<Document>> {
    let mut stmt = conn.prepare(
        "SELECT body FROM documents WHERE doctype = ?1 AND deleted = 0 ORDER BY id",
    )?;
    let bodies = stmt
        .query_map(params![doctype], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    bodies.iter().map(|b| decode_body(doctype, b)).collect()
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create_doc(&self, doc: &mut Document) -> Result<()> {
        let input = doc.clone();
        let created = self
            .run_blocking(move |conn| {
                let mut doc = input;
                create_in(conn, &mut doc)?;
                Ok(doc)
            })
            .await?;
        *doc = created;
        self.emit_all(vec![(Verb::Created, doc.clone(), None)]);
        Ok(())
    }

    async fn get_doc(&self, doctype: &str, id: &str) -> Result<Option<Document>> {
        let doctype = doctype.to_string();
        let id = id.to_string();
        self.run_blocking(move |conn| {
            Ok(load(conn, &doctype, &id)?
                .map(|s| s.doc)
                .filter(|d| !d.is_deleted()))
        })
        .await
    }

    async fn update_doc(&self, doc: &mut Document) -> Result<()> {
        let input = doc.clone();
        let (updated, old) = self
            .run_blocking(move |conn| {
                let mut doc = input;
                let old = update_in(conn, &mut doc)?;
                Ok((doc, old))
            })
            .await?;
        *doc = updated;
        self.emit_all(vec![(Verb::Updated, doc.clone(), Some(old))]);
        Ok(())
    }

    async fn delete_doc(&self, doc: &Document) -> Result<Document> {
        let mut tombstone = Document::new(doc.doctype.clone(), doc.id.clone());
        tombstone.rev = doc.rev.clone();
        tombstone.mark_deleted();
        let (tombstone, old) = self
            .run_blocking(move |conn| {
                let old = update_in(conn, &mut tombstone)?;
                Ok((tombstone, old))
            })
            .await?;
        self.emit_all(vec![(Verb::Deleted, tombstone.clone(), Some(old))]);
        Ok(tombstone)
    }

    async fn bulk_get(&self, doctype: &str, ids: &[String]) -> Result<Vec<Document>> {
        let doctype = doctype.to_string();
        let ids = ids.to_vec();
        self.run_blocking(move |conn| {
            let mut out = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(stored) = load(conn, &doctype, id)? {
                    let mut doc = stored.doc;
                    doc.set_revisions(&stored.history);
                    out.push(doc);
                }
            }
            Ok(out)
        })
        .await
    }

    async fn bulk_update(&self, doctype: &str, docs: Vec<Document>) -> Result<Vec<Document>> {
        let doctype = doctype.to_string();
        let (written, emitted) = self
            .run_blocking(move |conn| {
                let tx = conn.transaction()?;
                let mut written = Vec::with_capacity(docs.len());
                let mut emitted: Emitted = Vec::with_capacity(docs.len());
                for mut doc in docs {
                    doc.doctype = doctype.clone();
                    if doc.rev.is_none() {
                        create_in(&tx, &mut doc)?;
                        emitted.push((Verb::Created, doc.clone(), None));
                    } else {
                        let old = update_in(&tx, &mut doc)?;
                        emitted.push((Verb::Updated, doc.clone(), Some(old)));
                    }
                    written.push(doc);
                }
                tx.commit()?;
                Ok((written, emitted))
            })
            .await?;
        self.emit_all(emitted);
        Ok(written)
    }

    async fn bulk_force_update(&self, doctype: &str, docs: Vec<Document>) -> Result<()> {
        let doctype = doctype.to_string();
        let emitted = self
            .run_blocking(move |conn| {
                let tx = conn.transaction()?;
                let mut emitted: Emitted = Vec::new();
                for mut doc in docs {
                    doc.doctype = doctype.clone();
                    if let Some(event) = force_in(&tx, doc)? {
                        emitted.push(event);
                    }
                }
                tx.commit()?;
                Ok(emitted)
            })
            .await?;
        self.emit_all(emitted);
        Ok(())
    }

    async fn changes(&self, doctype: &str, since: &str, limit: usize) -> Result<ChangesFeed> {
        let doctype = doctype.to_string();
        let since = since.to_string();
        self.run_blocking(move |conn| {
            let since_n = parse_seq(&since) as i64;
            let mut stmt = conn.prepare(
                "SELECT id, seq, body FROM documents
                 WHERE doctype = ?1 AND seq > ?2 ORDER BY seq LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![doctype, since_n, limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE doctype = ?1 AND seq > ?2",
                params![doctype, since_n],
                |row| row.get(0),
            )?;

            let mut results = Vec::with_capacity(rows.len());
            for (id, seq, body) in rows {
                let doc = decode_body(&doctype, &body)?;
                results.push(Change {
                    seq: format_seq(seq as u64, &id),
                    rev: doc.rev_str().to_string(),
                    deleted: doc.is_deleted(),
                    id,
                    doc,
                });
            }
            let last_seq = results
                .last()
                .map(|c| c.seq.clone())
                .unwrap_or(since);
            Ok(ChangesFeed {
                last_seq,
                pending: (total as u64).saturating_sub(results.len() as u64),
                results,
            })
        })
        .await
    }

    async fn find(&self, doctype: &str, selector: &Selector) -> Result<Vec<Document>> {
        let doctype = doctype.to_string();
        let selector = selector.clone();
        self.run_blocking(move |conn| {
            Ok(live_docs(conn, &doctype)?
                .into_iter()
                .filter(|d| selector.matches(d))
                .collect())
        })
        .await
    }

    async fn all_docs(&self, doctype: &str) -> Result<Vec<Document>> {
        let doctype = doctype.to_string();
        self.run_blocking(move |conn| live_docs(conn, &doctype)).await
    }
}
