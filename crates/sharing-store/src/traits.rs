//! Storage traits: the document database and the virtual file system.
//!
//! The sharing engine never talks to a concrete database. Implementations
//! include SQLite (documents), and in-memory stores for both traits.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use sharing_core::consts::{ROOT_DIR_ID, TRASH_DIR_ID};
use sharing_core::revision::{new_rev, rev_generation, MAX_DEPTH};
use sharing_core::{DocReference, Document};

use crate::error::Result;
use crate::file::FileDoc;

/// One entry of a changes feed: the latest state of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub id: String,
    pub seq: String,
    pub rev: String,
    pub deleted: bool,
    pub doc: Document,
}

/// A page of a changes feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangesFeed {
    /// Sequence to resume from.
    pub last_seq: String,
    /// Number of changes left after this page.
    pub pending: u64,
    pub results: Vec<Change>,
}

/// A minimal query language over document fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// The dotted path holds this value (or an array containing it).
    Eq(String, Value),
    /// The dotted path is present.
    Exists(String),
    And(Vec<Selector>),
}

impl Selector {
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Selector::Eq(path.into(), value.into())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Selector::Eq(path, expected) => match lookup(doc, path) {
                Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
                Some(value) => value == expected,
                None => false,
            },
            Selector::Exists(path) => lookup(doc, path).is_some(),
            Selector::And(all) => all.iter().all(|s| s.matches(doc)),
        }
    }
}

fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    if path == "_id" {
        return None;
    }
    doc.get_path(path)
}

/// Format a sequence number of a changes feed.
pub fn format_seq(n: u64, id: &str) -> String {
    let hash = blake3::hash(id.as_bytes());
    format!("{}-{}", n, &hash.to_hex()[..12])
}

/// The integer part of a sequence. Empty or malformed sequences are 0.
pub fn parse_seq(seq: &str) -> u64 {
    match seq.parse::<u64>() {
        Ok(n) => n,
        Err(_) => rev_generation(seq),
    }
}

/// Revision for the next write of a document.
pub fn next_rev(current: Option<&str>, doc: &Document) -> Result<String> {
    let generation = current.map(rev_generation).unwrap_or(0) + 1;
    let body = serde_json::to_vec(&doc.fields)?;
    Ok(new_rev(generation, &body))
}

/// Append a revision to a history, keeping at most [`MAX_DEPTH`] entries.
pub fn push_rev(history: &mut Vec<String>, rev: String) {
    history.push(rev);
    if history.len() > MAX_DEPTH {
        let excess = history.len() - MAX_DEPTH;
        history.drain(..excess);
    }
}

/// The document database.
///
/// Every write assigns a new revision and advances the changes feed of the
/// doctype. Deletions leave a tombstone that keeps the revision history.
///
/// # Design Notes
///
/// - **Optimistic concurrency**: updates must carry the current revision,
///   otherwise they fail with `Conflict`.
/// - **Forced writes**: replicated documents are written with the revision
///   and history they carry. Writing the current revision again is a no-op.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // Single Documents

    /// Create a document. An empty id is replaced by a fresh one. Sets the
    /// revision of `doc`.
    async fn create_doc(&self, doc: &mut Document) -> Result<()>;

    /// Get a live document. Tombstones are reported as absent.
    async fn get_doc(&self, doctype: &str, id: &str) -> Result<Option<Document>>;

    /// Update a document. `doc.rev` must be the current revision.
    async fn update_doc(&self, doc: &mut Document) -> Result<()>;

    /// Delete a document, returning its tombstone.
    async fn delete_doc(&self, doc: &Document) -> Result<Document>;

    // Bulk Operations

    /// Current state of the given documents, tombstones included, each with
    /// its `_revisions` chain. Unknown ids are skipped.
    async fn bulk_get(&self, doctype: &str, ids: &[String]) -> Result<Vec<Document>>;

    /// Create or update several documents of the same doctype.
    async fn bulk_update(&self, doctype: &str, docs: Vec<Document>) -> Result<Vec<Document>>;

    /// Write replicated documents with the revision and `_revisions` they carry.
    async fn bulk_force_update(&self, doctype: &str, docs: Vec<Document>) -> Result<()>;

    // Queries

    /// Changes of a doctype after `since`, oldest first.
    async fn changes(&self, doctype: &str, since: &str, limit: usize) -> Result<ChangesFeed>;

    /// Live documents matching the selector.
    async fn find(&self, doctype: &str, selector: &Selector) -> Result<Vec<Document>>;

    /// Every live document of a doctype.
    async fn all_docs(&self, doctype: &str) -> Result<Vec<Document>>;
}

/// The virtual file system.
///
/// File documents are addressed by id. Names are unique inside a directory.
#[async_trait]
pub trait Vfs: Send + Sync {
    // Lookups

    async fn get(&self, id: &str) -> Result<Option<FileDoc>>;

    async fn get_by_path(&self, path: &str) -> Result<Option<FileDoc>>;

    /// Direct children of a directory, sorted by name.
    async fn children(&self, dir_id: &str) -> Result<Vec<FileDoc>>;

    /// Files and directories referencing the given document.
    async fn find_referenced_by(&self, reference: &DocReference) -> Result<Vec<FileDoc>>;

    /// Ids of the directories above a file or directory, closest first,
    /// the root included.
    async fn ancestors(&self, id: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut current = match self.get(id).await? {
            Some(doc) => doc.dir_id,
            None => return Ok(out),
        };
        while !current.is_empty() && !out.contains(&current) {
            out.push(current.clone());
            if current == ROOT_DIR_ID {
                break;
            }
            current = match self.get(&current).await? {
                Some(doc) => doc.dir_id,
                None => break,
            };
        }
        Ok(out)
    }

    /// Whether the file or directory is in the trash.
    async fn is_trashed(&self, id: &str) -> Result<bool> {
        if id == TRASH_DIR_ID {
            return Ok(true);
        }
        Ok(self.ancestors(id).await?.iter().any(|a| a == TRASH_DIR_ID))
    }

    // Local Writes

    /// Create a directory. An empty id is replaced by a fresh one.
    async fn create_dir(&self, doc: FileDoc) -> Result<FileDoc>;

    /// Create a file with its content. Size and checksum are computed.
    async fn create_file(&self, doc: FileDoc, content: Bytes) -> Result<FileDoc>;

    /// Update metadata, rename, or move. `doc.rev` must be current.
    async fn update(&self, doc: FileDoc) -> Result<FileDoc>;

    /// Replace the content of a file.
    async fn write_content(&self, id: &str, content: Bytes) -> Result<FileDoc>;

    /// Move to the trash.
    async fn trash(&self, id: &str) -> Result<FileDoc>;

    /// Delete for good, with every descendant.
    async fn destroy(&self, id: &str) -> Result<()>;

    /// Read the content of a file.
    async fn open(&self, id: &str) -> Result<Bytes>;

    // Replicated Writes

    /// Create or replace a file or directory with the revision and history
    /// it carries. `content` replaces the content of a file when given.
    async fn force_put(&self, doc: FileDoc, content: Option<Bytes>) -> Result<FileDoc>;

    /// Get a directory by id, creating it under the root with this name
    /// when missing.
    async fn ensure_dir(&self, id: &str, name: &str) -> Result<FileDoc> {
        if let Some(dir) = self.get(id).await? {
            return Ok(dir);
        }
        let dir = FileDoc::new_dir(name, ROOT_DIR_ID).with_id(id);
        self.create_dir(dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_selector_matches() {
        let doc = Document::from_value(
            "io.cozy.notes",
            json!({"_id": "1", "kind": "todo", "meta": {"tags": ["a", "b"]}}),
        )
        .unwrap();
        assert!(Selector::eq("kind", "todo").matches(&doc));
        assert!(Selector::eq("meta.tags", "b").matches(&doc));
        assert!(!Selector::eq("kind", "note").matches(&doc));
        assert!(Selector::And(vec![
            Selector::Exists("meta".into()),
            Selector::eq("kind", "todo"),
        ])
        .matches(&doc));
    }

    #[test]
    fn test_seq_format_and_parse() {
        let seq = format_seq(42, "doc1");
        assert!(seq.starts_with("42-"));
        assert_eq!(parse_seq(&seq), 42);
        assert_eq!(parse_seq(""), 0);
        assert_eq!(parse_seq("0"), 0);
        assert_eq!(parse_seq("7"), 7);
    }

    #[test]
    fn test_push_rev_caps_history() {
        let mut history = Vec::new();
        for i in 1..=150 {
            push_rev(&mut history, format!("{}-x", i));
        }
        assert_eq!(history.len(), MAX_DEPTH);
        assert_eq!(history[0], "51-x");
    }
}
