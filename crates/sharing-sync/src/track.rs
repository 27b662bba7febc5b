//! Tracking of local writes.
//!
//! Every local event is checked against the rules of each active sharing.
//! A document entering, changing in, or leaving a sharing updates its shared
//! reference, which in turn feeds the replicator and the uploader.

use tracing::{debug, trace};

use sharing_core::consts::{is_special_dir, FILES, FILE_TYPE, TRASH_DIR_ID};
use sharing_core::{DocReference, Document, RevsTree, RuleAction, Verb};
use sharing_perms::Sharing;
use sharing_store::{walk_tree, DocumentStore, Event, Vfs};

use crate::context::SyncContext;
use crate::error::Result;
use crate::lock::SHARED_LOCK;
use crate::shared::{SharedInfo, SharedRef};

/// What a local event did to a sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Nothing to propagate.
    Unchanged,
    /// References changed; the workers to schedule.
    Updated { replicate: bool, upload: bool },
    /// A document whose removal revokes the sharing was deleted.
    RevokeSharing,
}

impl TrackOutcome {
    fn merge(self, other: TrackOutcome) -> TrackOutcome {
        match (self, other) {
            (TrackOutcome::RevokeSharing, _) | (_, TrackOutcome::RevokeSharing) => {
                TrackOutcome::RevokeSharing
            }
            (TrackOutcome::Unchanged, o) | (o, TrackOutcome::Unchanged) => o,
            (
                TrackOutcome::Updated { replicate: r1, upload: u1 },
                TrackOutcome::Updated { replicate: r2, upload: u2 },
            ) => TrackOutcome::Updated {
                replicate: r1 || r2,
                upload: u1 || u2,
            },
        }
    }

    fn for_info(info: &SharedInfo) -> TrackOutcome {
        TrackOutcome::Updated {
            replicate: info.is_replicated(),
            upload: !info.is_replicated(),
        }
    }
}

fn is_file(doc: &Document) -> bool {
    doc.doctype == FILES && doc.get_str("type") == Some(FILE_TYPE)
}

fn parent_rev(event: &Event) -> Option<&str> {
    event
        .old
        .as_ref()
        .map(Document::rev_str)
        .filter(|r| !r.is_empty())
}

impl<S: DocumentStore, V: Vfs> SyncContext<S, V> {
    /// Directories above a file document, closest first.
    async fn file_ancestors(&self, doc: &Document) -> Result<Vec<String>> {
        let Some(dir_id) = doc.get_str("dir_id").filter(|d| !d.is_empty()) else {
            return Ok(Vec::new());
        };
        let mut ancestors = vec![dir_id.to_string()];
        if let Some(dir) = self.vfs.get(dir_id).await? {
            ancestors.extend(self.vfs.ancestors(&dir.id).await?);
        }
        Ok(ancestors)
    }

    /// Apply a local event to the references of one sharing.
    pub async fn track_event(&self, sharing: &Sharing, event: &Event) -> Result<TrackOutcome> {
        if !sharing.active || sharing.triggers.track_ids.is_empty() {
            return Ok(TrackOutcome::Unchanged);
        }
        let doc = &event.doc;
        if doc.doctype == FILES
            && (is_special_dir(&doc.id) || sharing.root_dir_id() == Some(doc.id.as_str()))
        {
            return Ok(TrackOutcome::Unchanged);
        }

        // A tombstone has no fields left: match on what was deleted.
        let subject = match (event.verb, &event.old) {
            (Verb::Deleted, Some(old)) => old,
            _ => doc,
        };
        let ancestors = if doc.doctype == FILES {
            self.file_ancestors(subject).await?
        } else {
            Vec::new()
        };
        let trashed = doc.doctype == FILES
            && (subject.get_bool("trashed") || ancestors.iter().any(|a| a == TRASH_DIR_ID));
        let selected = if trashed {
            None
        } else {
            sharing.first_matching_rule(subject, &ancestors)
        };

        let _guard = self.locks.write(SHARED_LOCK).await;
        let existing = self.load_ref(&doc.doc_ref()).await?;
        let info = existing
            .as_ref()
            .and_then(|r| r.infos.get(&sharing.id))
            .copied();

        match (event.verb, selected) {
            (Verb::Deleted, _) => {
                let Some(rule) = selected.or(info.map(|i| i.rule)) else {
                    return Ok(TrackOutcome::Unchanged);
                };
                let Some(rule_def) = sharing.rules.get(rule) else {
                    return Ok(TrackOutcome::Unchanged);
                };
                if !rule_def.remove.propagates(sharing.owner) {
                    return Ok(TrackOutcome::Unchanged);
                }
                if rule_def.remove == RuleAction::Revoke {
                    debug!(sharing_id = %sharing.id, doc = %doc.doc_ref(), "shared document deleted, revoking");
                    return Ok(TrackOutcome::RevokeSharing);
                }
                match existing {
                    Some(shared) => self.mark_removed(sharing, shared, event).await,
                    None => Ok(TrackOutcome::Unchanged),
                }
            }
            (verb, Some(rule)) => {
                let tracked = sharing.rules[rule]
                    .trigger_args(sharing.owner)
                    .is_some_and(|args| args.matches(verb, subject, &ancestors));
                if !tracked {
                    return Ok(TrackOutcome::Unchanged);
                }
                let entering = info.map_or(true, |i| i.removed);
                let mut outcome = self.mark_live(sharing, rule, existing, event).await?;
                if entering && doc.doctype == FILES && !is_file(doc) {
                    outcome = outcome.merge(self.cascade_in(sharing, rule, &doc.id).await?);
                }
                Ok(outcome)
            }
            (_, None) => match (existing, info) {
                (Some(shared), Some(info)) if !info.removed => {
                    let propagates = sharing
                        .rules
                        .get(info.rule)
                        .is_some_and(|r| r.trigger_args(sharing.owner).is_some());
                    if !propagates {
                        return Ok(TrackOutcome::Unchanged);
                    }
                    let mut outcome = self.mark_removed(sharing, shared, event).await?;
                    if doc.doctype == FILES && !is_file(doc) {
                        outcome = outcome.merge(self.cascade_out(sharing, &doc.id).await?);
                    }
                    Ok(outcome)
                }
                _ => Ok(TrackOutcome::Unchanged),
            },
        }
    }

    async fn mark_live(
        &self,
        sharing: &Sharing,
        rule: usize,
        existing: Option<SharedRef>,
        event: &Event,
    ) -> Result<TrackOutcome> {
        let doc = &event.doc;
        let rev = doc.rev_str();
        let info = SharedInfo::new(rule, is_file(doc));
        let mut shared = match existing {
            Some(shared) => {
                if shared.revisions.contains(rev) && shared.infos.get(&sharing.id) == Some(&info) {
                    trace!(doc = %doc.doc_ref(), rev, "revision already known");
                    return Ok(TrackOutcome::Unchanged);
                }
                let mut shared = shared;
                if !shared.revisions.contains(rev) {
                    shared.record_rev(rev, parent_rev(event));
                }
                shared
            }
            None => {
                let tree = doc
                    .revisions()
                    .and_then(|chain| RevsTree::from_chain(&chain))
                    .unwrap_or_else(|| RevsTree::new(rev));
                SharedRef::new(&doc.doc_ref(), tree)
            }
        };
        shared.infos.insert(sharing.id.clone(), info);
        self.save_ref(&mut shared).await?;
        Ok(TrackOutcome::for_info(&info))
    }

    async fn mark_removed(
        &self,
        sharing: &Sharing,
        mut shared: SharedRef,
        event: &Event,
    ) -> Result<TrackOutcome> {
        let Some(info) = shared.infos.get_mut(&sharing.id) else {
            return Ok(TrackOutcome::Unchanged);
        };
        let rev = event.doc.rev_str();
        if info.removed && shared.revisions.contains(rev) {
            return Ok(TrackOutcome::Unchanged);
        }
        *info = info.into_removed();
        let info = *info;
        if !rev.is_empty() && !shared.revisions.contains(rev) {
            shared.record_rev(rev, parent_rev(event));
        }
        self.save_ref(&mut shared).await?;
        Ok(TrackOutcome::for_info(&info))
    }

    /// A directory entered the sharing: track everything below it.
    async fn cascade_in(&self, sharing: &Sharing, rule: usize, dir_id: &str) -> Result<TrackOutcome> {
        let mut outcome = TrackOutcome::Unchanged;
        for entry in walk_tree(self.vfs.as_ref(), dir_id).await?.into_iter().skip(1) {
            let Some(file) = self.vfs.get(&entry.id).await? else {
                continue;
            };
            let doc = file.to_document_with_revisions()?;
            if self.track_current(&sharing.id, rule, &doc).await? {
                outcome = outcome.merge(TrackOutcome::Updated {
                    replicate: entry.is_dir,
                    upload: !entry.is_dir,
                });
            }
        }
        Ok(outcome)
    }

    /// A directory left the sharing: everything below it leaves too.
    async fn cascade_out(&self, sharing: &Sharing, dir_id: &str) -> Result<TrackOutcome> {
        let mut outcome = TrackOutcome::Unchanged;
        for entry in walk_tree(self.vfs.as_ref(), dir_id).await?.into_iter().skip(1) {
            let Some(file) = self.vfs.get(&entry.id).await? else {
                continue;
            };
            let doc = file.to_document()?;
            let Some(mut shared) = self.load_ref(&doc.doc_ref()).await? else {
                continue;
            };
            let Some(info) = shared.infos.get_mut(&sharing.id) else {
                continue;
            };
            if info.removed {
                continue;
            }
            *info = info.into_removed();
            shared.revisions.add(doc.rev_str());
            self.save_ref(&mut shared).await?;
            outcome = outcome.merge(TrackOutcome::Updated {
                replicate: true,
                upload: false,
            });
        }
        Ok(outcome)
    }

    /// Make sure a document is tracked by a sharing at its current revision.
    /// Returns whether the reference changed.
    async fn track_current(&self, sharing_id: &str, rule: usize, doc: &Document) -> Result<bool> {
        let info = SharedInfo::new(rule, is_file(doc));
        let chain = doc
            .revisions()
            .unwrap_or_else(|| vec![doc.rev_str().to_string()]);
        let mut shared = match self.load_ref(&doc.doc_ref()).await? {
            Some(shared) => {
                if shared.revisions.contains(doc.rev_str())
                    && shared.infos.get(sharing_id) == Some(&info)
                {
                    return Ok(false);
                }
                let mut shared = shared;
                shared.record_chain(&chain);
                shared
            }
            None => match RevsTree::from_chain(&chain) {
                Some(tree) => SharedRef::new(&doc.doc_ref(), tree),
                None => return Ok(false),
            },
        };
        shared.infos.insert(sharing_id.to_string(), info);
        self.save_ref(&mut shared).await?;
        Ok(true)
    }

    /// Create the references of every document the rules select, for the
    /// first replication. Returns the number of files to transfer.
    pub async fn initial_copy(&self, sharing: &Sharing) -> Result<u64> {
        let _guard = self.locks.write(SHARED_LOCK).await;
        let mut files = 0;
        for (index, rule) in sharing.rules.iter().enumerate() {
            if rule.local {
                continue;
            }
            let docs = self.rule_documents(rule, index).await?;
            for doc in docs {
                let binary = is_file(&doc);
                self.track_current(&sharing.id, index, &doc).await?;
                if binary {
                    files += 1;
                }
            }
        }
        debug!(sharing_id = %sharing.id, files, "initial copy prepared");
        Ok(files)
    }

    async fn rule_documents(&self, rule: &sharing_core::Rule, index: usize) -> Result<Vec<Document>> {
        let mut docs = Vec::new();
        if rule.doctype == FILES {
            if rule.selects_by_id() {
                for value in &rule.values {
                    for entry in walk_tree(self.vfs.as_ref(), value).await? {
                        if entry.id == *value && entry.is_dir {
                            continue;
                        }
                        if let Some(file) = self.vfs.get(&entry.id).await? {
                            docs.push(file.to_document_with_revisions()?);
                        }
                    }
                }
            } else if rule.selects_by_reference() {
                for value in &rule.values {
                    let Some((doctype, id)) = value.split_once('/') else {
                        continue;
                    };
                    let reference = DocReference::new(doctype, id);
                    for file in self.vfs.find_referenced_by(&reference).await? {
                        if !file.trashed {
                            docs.push(file.to_document_with_revisions()?);
                        }
                    }
                }
            }
            trace!(rule = index, count = docs.len(), "files selected");
            return Ok(docs);
        }

        let ids: Vec<String> = self
            .store
            .all_docs(&rule.doctype)
            .await?
            .into_iter()
            .filter(|d| rule.accept(&rule.doctype, d))
            .map(|d| d.id)
            .collect();
        if !ids.is_empty() {
            docs = self.store.bulk_get(&rule.doctype, &ids).await?;
        }
        trace!(rule = index, count = docs.len(), "documents selected");
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context_on, TestContext};
    use crate::transport::memory::MemoryNetwork;
    use bytes::Bytes;
    use sharing_core::consts::ROOT_DIR_ID;
    use sharing_core::Rule;
    use sharing_perms::Member;
    use sharing_store::{EventBus, FileDoc};
    use tokio::sync::broadcast::Receiver;

    struct Fixture {
        ctx: TestContext,
        events: Receiver<Event>,
        sharing: Sharing,
        root: String,
    }

    async fn fixture(remove: RuleAction) -> Fixture {
        let bus = EventBus::default();
        let events = bus.subscribe();
        let ctx = context_on("https://alice.example.net", &MemoryNetwork::new(), bus);
        let root = ctx
            .vfs
            .create_dir(FileDoc::new_dir("Shared", ROOT_DIR_ID))
            .await
            .unwrap();
        let rule = Rule::files_by_id("Shared", root.id.clone()).with_policies(
            RuleAction::Sync,
            RuleAction::Sync,
            remove,
        );
        let mut sharing = Sharing::new("Shared", vec![rule], Member::owner("https://alice.example.net", "Alice"));
        sharing.id = "s1".into();
        sharing.active = true;
        sharing.triggers.track_ids = sharing
            .rules
            .iter()
            .filter_map(|r| r.trigger_args(true))
            .map(|a| a.to_string())
            .collect();
        Fixture {
            ctx,
            events,
            sharing,
            root: root.id,
        }
    }

    impl Fixture {
        async fn drain(&mut self) -> TrackOutcome {
            let mut outcome = TrackOutcome::Unchanged;
            while let Ok(event) = self.events.try_recv() {
                outcome = outcome.merge(self.ctx.track_event(&self.sharing, &event).await.unwrap());
            }
            outcome
        }

        async fn info(&self, id: &str) -> Option<SharedInfo> {
            self.ctx
                .load_ref(&sharing_core::DocRef::new(FILES, id))
                .await
                .unwrap()
                .and_then(|r| r.infos.get("s1").copied())
        }
    }

    #[tokio::test]
    async fn test_files_in_shared_dir_are_tracked() {
        let mut f = fixture(RuleAction::Sync).await;
        assert_eq!(f.drain().await, TrackOutcome::Unchanged);

        let sub = f.ctx.vfs.create_dir(FileDoc::new_dir("sub", f.root.clone())).await.unwrap();
        let file = f
            .ctx
            .vfs
            .create_file(FileDoc::new_file("a.txt", sub.id.clone()), Bytes::from_static(b"a"))
            .await
            .unwrap();
        assert_eq!(
            f.drain().await,
            TrackOutcome::Updated {
                replicate: true,
                upload: true
            }
        );
        assert_eq!(f.info(&sub.id).await, Some(SharedInfo::new(0, false)));
        assert_eq!(f.info(&file.id).await, Some(SharedInfo::new(0, true)));
    }

    #[tokio::test]
    async fn test_outside_files_are_ignored() {
        let mut f = fixture(RuleAction::Sync).await;
        f.drain().await;
        let file = f
            .ctx
            .vfs
            .create_file(FileDoc::new_file("private.txt", ROOT_DIR_ID), Bytes::from_static(b"p"))
            .await
            .unwrap();
        assert_eq!(f.drain().await, TrackOutcome::Unchanged);
        assert_eq!(f.info(&file.id).await, None);
    }

    #[tokio::test]
    async fn test_moving_a_dir_out_removes_its_subtree() {
        let mut f = fixture(RuleAction::Sync).await;
        let sub = f.ctx.vfs.create_dir(FileDoc::new_dir("sub", f.root.clone())).await.unwrap();
        let file = f
            .ctx
            .vfs
            .create_file(FileDoc::new_file("a.txt", sub.id.clone()), Bytes::from_static(b"a"))
            .await
            .unwrap();
        f.drain().await;

        let mut moved = f.ctx.vfs.get(&sub.id).await.unwrap().unwrap();
        moved.dir_id = ROOT_DIR_ID.to_string();
        f.ctx.vfs.update(moved).await.unwrap();
        f.drain().await;

        assert!(f.info(&sub.id).await.unwrap().removed);
        assert!(f.info(&file.id).await.unwrap().removed);

        // And back in again.
        let mut moved = f.ctx.vfs.get(&sub.id).await.unwrap().unwrap();
        moved.dir_id = f.root.clone();
        f.ctx.vfs.update(moved).await.unwrap();
        f.drain().await;
        assert!(!f.info(&sub.id).await.unwrap().removed);
        assert!(!f.info(&file.id).await.unwrap().removed);
    }

    #[tokio::test]
    async fn test_trash_and_delete() {
        let mut f = fixture(RuleAction::Sync).await;
        let file = f
            .ctx
            .vfs
            .create_file(FileDoc::new_file("a.txt", f.root.clone()), Bytes::from_static(b"a"))
            .await
            .unwrap();
        f.drain().await;

        f.ctx.vfs.trash(&file.id).await.unwrap();
        assert_eq!(
            f.drain().await,
            TrackOutcome::Updated {
                replicate: true,
                upload: false
            }
        );
        assert!(f.info(&file.id).await.unwrap().removed);
    }

    #[tokio::test]
    async fn test_known_revision_is_unchanged() {
        let mut f = fixture(RuleAction::Sync).await;
        f.ctx
            .vfs
            .create_file(FileDoc::new_file("a.txt", f.root.clone()), Bytes::from_static(b"a"))
            .await
            .unwrap();
        let event = f.events.try_recv().unwrap();
        assert_ne!(
            f.ctx.track_event(&f.sharing, &event).await.unwrap(),
            TrackOutcome::Unchanged
        );
        assert_eq!(
            f.ctx.track_event(&f.sharing, &event).await.unwrap(),
            TrackOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_revoke_on_removal() {
        let mut f = fixture(RuleAction::Revoke).await;
        let file = f
            .ctx
            .vfs
            .create_file(FileDoc::new_file("a.txt", f.root.clone()), Bytes::from_static(b"a"))
            .await
            .unwrap();
        f.drain().await;
        f.ctx.vfs.destroy(&file.id).await.unwrap();
        assert_eq!(f.drain().await, TrackOutcome::RevokeSharing);
    }

    #[tokio::test]
    async fn test_initial_copy_counts_files() {
        let f = fixture(RuleAction::Sync).await;
        let sub = f.ctx.vfs.create_dir(FileDoc::new_dir("sub", f.root.clone())).await.unwrap();
        for name in ["a", "b"] {
            f.ctx
                .vfs
                .create_file(FileDoc::new_file(name, sub.id.clone()), Bytes::from_static(b"x"))
                .await
                .unwrap();
        }
        assert_eq!(f.ctx.initial_copy(&f.sharing).await.unwrap(), 2);
        assert_eq!(f.ctx.refs_of_sharing("s1").await.unwrap().len(), 3);
        assert_eq!(f.info(&f.root).await, None);
    }
}
