//! Shared references: which sharings a document belongs to, and every
//! revision of it seen on either side.
//!
//! A reference is stored in `io.cozy.shared` under the id `doctype/docid`.
//! Its changes feed drives the replicator and the uploader.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use sharing_core::consts::SHARED;
use sharing_core::{DocRef, Document, RevsTree};
use sharing_store::{DocumentStore, Selector, Vfs};

use crate::context::SyncContext;
use crate::error::{Result, SyncError};

fn is_false(b: &bool) -> bool {
    !*b
}

/// How a document takes part in one sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedInfo {
    /// Index of the rule that selected the document.
    pub rule: usize,
    /// The document left the sharing.
    #[serde(default, skip_serializing_if = "is_false")]
    pub removed: bool,
    /// The document is a file whose content travels through the uploader.
    #[serde(default, skip_serializing_if = "is_false")]
    pub binary: bool,
}

impl SharedInfo {
    pub fn new(rule: usize, binary: bool) -> Self {
        Self {
            rule,
            removed: false,
            binary,
        }
    }

    /// The entry once the document left the sharing. Its removal travels
    /// through the replicator.
    pub fn into_removed(self) -> Self {
        Self {
            removed: true,
            binary: false,
            ..self
        }
    }

    /// Whether the replicator handles this entry. Live files belong to the
    /// uploader.
    pub fn is_replicated(&self) -> bool {
        !self.binary || self.removed
    }
}

/// The shared reference of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedRef {
    /// `doctype/docid`
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub revisions: RevsTree,
    /// Per sharing id.
    #[serde(default)]
    pub infos: BTreeMap<String, SharedInfo>,
}

impl SharedRef {
    pub fn new(doc_ref: &DocRef, revisions: RevsTree) -> Self {
        Self {
            id: doc_ref.key(),
            rev: None,
            revisions,
            infos: BTreeMap::new(),
        }
    }

    pub fn doc_ref(&self) -> Result<DocRef> {
        self.id
            .parse()
            .map_err(|_| SyncError::InvalidMessage(format!("invalid shared id {}", self.id)))
    }

    pub fn to_document(&self) -> Result<Document> {
        Ok(Document::from_typed(SHARED, self)?)
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        Ok(doc.decode()?)
    }

    /// Record an incoming chain, oldest first.
    pub fn record_chain(&mut self, chain: &[String]) {
        self.revisions.insert_chain(chain);
    }

    /// Record a local revision following `parent` when it is known.
    pub fn record_rev(&mut self, rev: &str, parent: Option<&str>) {
        match parent {
            Some(parent) if self.revisions.contains(parent) => {
                self.revisions.insert_after(rev, parent)
            }
            _ => self.revisions.add(rev),
        }
    }
}

impl<S: DocumentStore, V: Vfs> SyncContext<S, V> {
    pub async fn load_ref(&self, doc_ref: &DocRef) -> Result<Option<SharedRef>> {
        match self.store.get_doc(SHARED, &doc_ref.key()).await? {
            Some(doc) => Ok(Some(SharedRef::from_document(&doc)?)),
            None => Ok(None),
        }
    }

    /// Create or update a reference. Its revision is refreshed. A reference
    /// no longer part of any sharing is deleted.
    pub async fn save_ref(&self, shared: &mut SharedRef) -> Result<()> {
        let mut doc = shared.to_document()?;
        if shared.infos.is_empty() {
            if shared.rev.is_some() {
                self.store.delete_doc(&doc).await?;
            }
            return Ok(());
        }
        if shared.rev.is_none() {
            self.store.create_doc(&mut doc).await?;
        } else {
            self.store.update_doc(&mut doc).await?;
        }
        shared.rev = doc.rev;
        Ok(())
    }

    /// Every reference that is part of a sharing.
    pub async fn refs_of_sharing(&self, sharing_id: &str) -> Result<Vec<SharedRef>> {
        let selector = Selector::Exists(format!("infos.{}", sharing_id));
        let docs = self.store.find(SHARED, &selector).await?;
        docs.iter().map(SharedRef::from_document).collect()
    }

    /// Detach a sharing from every reference. Returns how many references
    /// were touched.
    pub async fn remove_sharing_from_refs(&self, sharing_id: &str) -> Result<usize> {
        let refs = self.refs_of_sharing(sharing_id).await?;
        let count = refs.len();
        for mut shared in refs {
            shared.infos.remove(sharing_id);
            self.save_ref(&mut shared).await?;
        }
        Ok(count)
    }

    /// Record revisions received from a peer for a document of a sharing.
    pub async fn record_revisions(
        &self,
        sharing_id: &str,
        doc_ref: &DocRef,
        chain: &[String],
        info: SharedInfo,
    ) -> Result<SharedRef> {
        let mut shared = match self.load_ref(doc_ref).await? {
            Some(mut existing) => {
                existing.record_chain(chain);
                existing
            }
            None => {
                let tree = RevsTree::from_chain(chain).ok_or_else(|| {
                    SyncError::InvalidMessage(format!("{} has no revision", doc_ref))
                })?;
                SharedRef::new(doc_ref, tree)
            }
        };
        shared.infos.insert(sharing_id.to_string(), info);
        self.save_ref(&mut shared).await?;
        Ok(shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;
    use sharing_core::consts::FILES;

    fn chain(revs: &[&str]) -> Vec<String> {
        revs.iter().map(|r| r.to_string()).collect()
    }

    #[tokio::test]
    async fn test_record_and_find_by_sharing() {
        let ctx = context("https://alice.example.net");
        let file = DocRef::new(FILES, "f1");
        ctx.record_revisions("s1", &file, &chain(&["1-a", "2-b"]), SharedInfo::new(0, true))
            .await
            .unwrap();
        ctx.record_revisions("s2", &file, &chain(&["2-b", "3-c"]), SharedInfo::new(1, true))
            .await
            .unwrap();

        let shared = ctx.load_ref(&file).await.unwrap().unwrap();
        assert!(shared.revisions.contains("1-a"));
        assert_eq!(shared.revisions.winner(), "3-c");
        assert_eq!(shared.infos.len(), 2);

        assert_eq!(ctx.refs_of_sharing("s1").await.unwrap().len(), 1);
        assert_eq!(ctx.refs_of_sharing("s3").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_remove_sharing_deletes_orphan_refs() {
        let ctx = context("https://alice.example.net");
        let a = DocRef::new(FILES, "a");
        let b = DocRef::new(FILES, "b");
        ctx.record_revisions("s1", &a, &chain(&["1-a"]), SharedInfo::new(0, true))
            .await
            .unwrap();
        ctx.record_revisions("s1", &b, &chain(&["1-b"]), SharedInfo::new(0, true))
            .await
            .unwrap();
        ctx.record_revisions("s2", &b, &chain(&["1-b"]), SharedInfo::new(0, true))
            .await
            .unwrap();

        assert_eq!(ctx.remove_sharing_from_refs("s1").await.unwrap(), 2);
        assert!(ctx.load_ref(&a).await.unwrap().is_none());
        let b_ref = ctx.load_ref(&b).await.unwrap().unwrap();
        assert_eq!(b_ref.infos.keys().collect::<Vec<_>>(), vec!["s2"]);
    }

    #[test]
    fn test_info_routing() {
        assert!(SharedInfo::new(0, false).is_replicated());
        assert!(!SharedInfo::new(0, true).is_replicated());
        let removed = SharedInfo::new(0, true).into_removed();
        assert!(removed.is_replicated());
        assert!(!removed.binary);
    }
}
