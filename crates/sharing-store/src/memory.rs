//! In-memory implementation of the DocumentStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use uuid::Uuid;

use sharing_core::{Document, Verb};

use crate::error::{Result, StoreError};
use crate::events::{Event, EventBus};
use crate::traits::{
    format_seq, next_rev, parse_seq, push_rev, Change, ChangesFeed, DocumentStore, Selector,
};

/// In-memory document store.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
    events: Option<EventBus>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Documents per doctype, by id.
    docs: HashMap<String, HashMap<String, StoredDoc>>,
    /// Changes feed per doctype: seq -> id. Only the latest seq of each
    /// document is kept.
    feeds: HashMap<String, BTreeMap<u64, String>>,
    /// Last seq per doctype.
    seqs: HashMap<String, u64>,
}

#[derive(Clone)]
struct StoredDoc {
    doc: Document,
    history: Vec<String>,
    seq: u64,
}

impl MemoryStoreInner {
    fn stored(&self, doctype: &str, id: &str) -> Option<&StoredDoc> {
        self.docs.get(doctype)?.get(id)
    }

    /// Store a document and move it to the head of the changes feed.
    fn put(&mut self, mut doc: Document, history: Vec<String>) {
        doc.remove("_revisions");
        let doctype = doc.doctype.clone();
        let seq = {
            let last = self.seqs.entry(doctype.clone()).or_insert(0);
            *last += 1;
            *last
        };
        let feed = self.feeds.entry(doctype.clone()).or_default();
        if let Some(old) = self.docs.get(&doctype).and_then(|m| m.get(&doc.id)) {
            feed.remove(&old.seq);
        }
        feed.insert(seq, doc.id.clone());
        self.docs
            .entry(doctype)
            .or_default()
            .insert(doc.id.clone(), StoredDoc { doc, history, seq });
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
            events: None,
        }
    }

    /// Publish every local write on the given bus.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn emit(&self, verb: Verb, doc: &Document, old: Option<Document>) {
        if let Some(events) = &self.events {
            events.emit(Event {
                verb,
                doc: doc.clone(),
                old,
            });
        }
    }

    fn create_in(inner: &mut MemoryStoreInner, doc: &mut Document) -> Result<()> {
        if doc.id.is_empty() {
            doc.id = Uuid::new_v4().simple().to_string();
        }
        let mut history = match inner.stored(&doc.doctype, &doc.id) {
            Some(existing) if !existing.doc.is_deleted() => {
                return Err(StoreError::AlreadyExists(format!("{}/{}", doc.doctype, doc.id)))
            }
            Some(tombstone) => tombstone.history.clone(),
            None => Vec::new(),
        };
        doc.remove("_revisions");
        doc.remove("_deleted");
        let rev = next_rev(history.last().map(String::as_str), doc)?;
        push_rev(&mut history, rev.clone());
        doc.rev = Some(rev);
        inner.put(doc.clone(), history);
        Ok(())
    }

    fn update_in(inner: &mut MemoryStoreInner, doc: &mut Document) -> Result<Document> {
        let existing = match inner.stored(&doc.doctype, &doc.id) {
            Some(existing) if !existing.doc.is_deleted() => existing.clone(),
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
        inner.put(doc.clone(), history);
        Ok(existing.doc)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_doc(&self, doc: &mut Document) -> Result<()> {
        {
            let mut inner = self.write()?;
            Self::create_in(&mut inner, doc)?;
        }
        self.emit(Verb::Created, doc, None);
        Ok(())
    }

    async fn get_doc(&self, doctype: &str, id: &str) -> Result<Option<Document>> {
        let inner = self.read()?;
        Ok(inner
            .stored(doctype, id)
            .filter(|s| !s.doc.is_deleted())
            .map(|s| s.doc.clone()))
    }

    async fn update_doc(&self, doc: &mut Document) -> Result<()> {
        let old = {
            let mut inner = self.write()?;
            Self::update_in(&mut inner, doc)?
        };
        self.emit(Verb::Updated, doc, Some(old));
        Ok(())
    }

    async fn delete_doc(&self, doc: &Document) -> Result<Document> {
        let mut tombstone = Document::new(doc.doctype.clone(), doc.id.clone());
        tombstone.rev = doc.rev.clone();
        tombstone.mark_deleted();
        let old = {
            let mut inner = self.write()?;
            Self::update_in(&mut inner, &mut tombstone)?
        };
        self.emit(Verb::Deleted, &tombstone, Some(old));
        Ok(tombstone)
    }

    async fn bulk_get(&self, doctype: &str, ids: &[String]) -> Result<Vec<Document>> {
        let inner = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.stored(doctype, id))
            .map(|s| {
                let mut doc = s.doc.clone();
                doc.set_revisions(&s.history);
                doc
            })
            .collect())
    }

    async fn bulk_update(&self, doctype: &str, docs: Vec<Document>) -> Result<Vec<Document>> {
        let mut written = Vec::with_capacity(docs.len());
        let mut events = Vec::with_capacity(docs.len());
        {
            let mut inner = self.write()?;
            for mut doc in docs {
                doc.doctype = doctype.to_string();
                if doc.rev.is_none() {
                    Self::create_in(&mut inner, &mut doc)?;
                    events.push((Verb::Created, doc.clone(), None));
                } else {
                    let old = Self::update_in(&mut inner, &mut doc)?;
                    events.push((Verb::Updated, doc.clone(), Some(old)));
                }
                written.push(doc);
            }
        }
        for (verb, doc, old) in events {
            self.emit(verb, &doc, old);
        }
        Ok(written)
    }

    async fn bulk_force_update(&self, doctype: &str, docs: Vec<Document>) -> Result<()> {
        let mut events = Vec::with_capacity(docs.len());
        {
            let mut inner = self.write()?;
            for mut doc in docs {
                doc.doctype = doctype.to_string();
                let Some(rev) = doc.rev.clone() else {
                    return Err(StoreError::InvalidData(format!(
                        "forced write of {}/{} without revision",
                        doctype, doc.id
                    )));
                };
                let old = inner.stored(doctype, &doc.id).map(|s| s.doc.clone());
                if old.as_ref().and_then(|o| o.rev.as_deref()) == Some(rev.as_str()) {
                    continue;
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
                inner.put(doc.clone(), history);
                events.push((verb, doc, old));
            }
        }
        for (verb, doc, old) in events {
            self.emit(verb, &doc, old);
        }
        Ok(())
    }

    async fn changes(&self, doctype: &str, since: &str, limit: usize) -> Result<ChangesFeed> {
        let inner = self.read()?;
        let since_n = parse_seq(since);
        let Some(feed) = inner.feeds.get(doctype) else {
            return Ok(ChangesFeed {
                last_seq: since.to_string(),
                pending: 0,
                results: Vec::new(),
            });
        };
        let after = feed.range(since_n + 1..);
        let total = after.clone().count();
        let mut results = Vec::new();
        for (seq, id) in after.take(limit) {
            if let Some(stored) = inner.stored(doctype, id) {
                results.push(Change {
                    id: id.clone(),
                    seq: format_seq(*seq, id),
                    rev: stored.doc.rev_str().to_string(),
                    deleted: stored.doc.is_deleted(),
                    doc: stored.doc.clone(),
                });
            }
        }
        let last_seq = results
            .last()
            .map(|c| c.seq.clone())
            .unwrap_or_else(|| since.to_string());
        Ok(ChangesFeed {
            last_seq,
            pending: (total - results.len().min(total)) as u64,
            results,
        })
    }

    async fn find(&self, doctype: &str, selector: &Selector) -> Result<Vec<Document>> {
        let inner = self.read()?;
        let mut docs: Vec<Document> = inner
            .docs
            .get(doctype)
            .into_iter()
            .flat_map(|m| m.values())
            .filter(|s| !s.doc.is_deleted() && selector.matches(&s.doc))
            .map(|s| s.doc.clone())
            .collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }

    async fn all_docs(&self, doctype: &str) -> Result<Vec<Document>> {
        self.find(doctype, &Selector::And(Vec::new())).await
    }
}
