//! Replication of documents and directories.
//!
//! A round reads the next batch of the shared feed, asks the member which
//! revisions it lacks, and sends those documents with their full revision
//! chain. Live files are left to the uploader; their removal is replicated
//! here as a tombstone.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::{debug, info};

use sharing_core::consts::{FILES, SHARED};
use sharing_core::{detect_conflict, rev_generation, xor_id, DocRef, DocReference, Document, XorKey};
use sharing_perms::Sharing;
use sharing_store::{DocumentStore, Vfs};

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::lock::{replicate_lock, SHARED_LOCK};
use crate::messages::{doc_key, BulkDocsRequest, MissingRevs, RevsDiffRequest, RevsDiffResponse};
use crate::seq::REPLICATOR;
use crate::shared::{SharedInfo, SharedRef};

/// Outcome of one round of the replicator or the uploader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundReport {
    /// Documents or files sent.
    pub sent: usize,
    /// More changes wait in the feed.
    pub pending: bool,
}

/// A shared reference selected for a member.
pub(crate) struct Entry {
    pub doc_ref: DocRef,
    pub shared: SharedRef,
    pub info: SharedInfo,
    pub seq: String,
}

/// Revision chain ending at the winning leaf of a reference.
pub(crate) fn winning_chain(shared: &SharedRef) -> Vec<String> {
    shared
        .revisions
        .chain_to(shared.revisions.winner())
        .unwrap_or_else(|| vec![shared.revisions.winner().to_string()])
}

impl<S: DocumentStore, V: Vfs> SyncContext<S, V> {
    /// Read the next batch of the shared feed for a member. Returns the
    /// entries handled by the given worker, the sequence to resume from and
    /// whether changes are left.
    pub(crate) async fn next_entries(
        &self,
        sharing: &Sharing,
        since: &str,
        limit: usize,
        uploads: bool,
    ) -> Result<(Vec<Entry>, String, bool)> {
        let feed = self.store.changes(SHARED, since, limit).await?;
        let mut entries = Vec::new();
        for change in feed.results {
            if change.deleted {
                continue;
            }
            let shared = SharedRef::from_document(&change.doc)?;
            let Some(info) = shared.infos.get(&sharing.id).copied() else {
                continue;
            };
            if info.is_replicated() == uploads {
                continue;
            }
            let Some(rule) = sharing.rules.get(info.rule) else {
                continue;
            };
            let allowed = if info.removed {
                rule.remove.propagates(sharing.owner)
            } else {
                rule.add.propagates(sharing.owner) || rule.update.propagates(sharing.owner)
            };
            if !allowed {
                continue;
            }
            entries.push(Entry {
                doc_ref: shared.doc_ref()?,
                shared,
                info,
                seq: change.seq,
            });
        }
        Ok((entries, feed.last_seq, feed.pending > 0))
    }

    /// Key of a document as the member knows it.
    pub(crate) fn member_key(doc_ref: &DocRef, key: &XorKey) -> String {
        if doc_ref.doctype == FILES {
            doc_key(FILES, &xor_id(&doc_ref.id, key))
        } else {
            doc_ref.key()
        }
    }

    /// Prepare a local document for a member: ids translated into its
    /// space, local-only fields dropped.
    pub(crate) fn outgoing_doc(
        &self,
        sharing: &Sharing,
        key: &XorKey,
        mut doc: Document,
        info: &SharedInfo,
    ) -> Document {
        if doc.doctype != FILES {
            return doc;
        }
        doc.id = xor_id(&doc.id, key);
        if doc.is_deleted() {
            return doc;
        }
        for field in ["path", "restore_path", "trashed"] {
            doc.remove(field);
        }
        let by_id = sharing
            .rules
            .get(info.rule)
            .is_some_and(|r| r.is_file_by_id());
        match doc.get_str("dir_id").map(String::from) {
            Some(dir_id) if by_id && sharing.root_dir_id() != Some(dir_id.as_str()) => {
                doc.set("dir_id", Value::String(xor_id(&dir_id, key)));
            }
            _ => {
                doc.remove("dir_id");
            }
        }
        let shared_refs: Vec<DocReference> = doc
            .references()
            .into_iter()
            .filter(|r| {
                sharing
                    .rules
                    .iter()
                    .any(|rule| rule.selects_by_reference() && rule.values.contains(&r.key()))
            })
            .collect();
        doc.set_references(&shared_refs);
        doc
    }

    /// The current state of a shared document, as a tombstone when it left
    /// the sharing or no longer exists.
    pub(crate) async fn entry_document(&self, entry: &Entry) -> Result<Document> {
        let tombstone = || {
            Document::tombstone(
                entry.doc_ref.doctype.clone(),
                entry.doc_ref.id.clone(),
                &winning_chain(&entry.shared),
            )
        };
        if entry.info.removed {
            return Ok(tombstone());
        }
        if entry.doc_ref.doctype == FILES {
            return match self.vfs.get(&entry.doc_ref.id).await? {
                Some(file) => {
                    let mut doc = file.to_document_with_revisions()?;
                    if doc.revisions().is_none() {
                        doc.set_revisions(&winning_chain(&entry.shared));
                    }
                    Ok(doc)
                }
                None => Ok(tombstone()),
            };
        }
        let docs = self
            .store
            .bulk_get(&entry.doc_ref.doctype, std::slice::from_ref(&entry.doc_ref.id))
            .await?;
        Ok(docs.into_iter().next().unwrap_or_else(tombstone))
    }

    /// One replication round towards a member.
    pub async fn replicate_to(&self, sharing_id: &str, member: usize) -> Result<RoundReport> {
        let _guard = self.locks.write(&replicate_lock(sharing_id)).await;
        let sharing = self.load_active_sharing(sharing_id).await?;
        if sharing.is_read_only_here(&self.instance_url) {
            return Ok(RoundReport::default());
        }
        let key = self.xor_key(&sharing, member)?;
        let since = self.get_last_seq(sharing_id, member, REPLICATOR).await?;
        let (entries, last_seq, pending) = self
            .next_entries(&sharing, &since, self.config.batch_size, false)
            .await?;
        if entries.is_empty() {
            self.update_last_seq(sharing_id, member, REPLICATOR, &last_seq)
                .await?;
            return Ok(RoundReport { sent: 0, pending });
        }

        let by_member_key: HashMap<String, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (Self::member_key(&e.doc_ref, &key), i))
            .collect();

        let selected: Vec<usize> = if since.is_empty() {
            // First round: the member knows nothing yet, send the newest
            // revision of everything.
            (0..entries.len()).collect()
        } else {
            let mut request = RevsDiffRequest::new();
            for (member_key, i) in &by_member_key {
                let leaves = entries[*i]
                    .shared
                    .revisions
                    .leaves()
                    .into_iter()
                    .map(String::from)
                    .collect();
                request.insert(member_key.clone(), leaves);
            }
            let transport = self.transport.as_ref();
            let request = &request;
            let missing = self
                .call_with_refresh(sharing_id, member, |target| async move {
                    transport.revs_diff(&target, sharing_id, request).await
                })
                .await?;
            let mut selected: Vec<usize> = missing
                .iter()
                .filter(|(_, m)| !m.missing.is_empty())
                .filter_map(|(k, _)| by_member_key.get(k).copied())
                .collect();
            selected.sort_unstable();
            selected
        };

        let mut docs = Vec::with_capacity(selected.len());
        for i in selected {
            let entry = &entries[i];
            let doc = self.entry_document(entry).await?;
            let depth = doc
                .get_str("path")
                .map(|p| p.matches('/').count())
                .unwrap_or(usize::MAX);
            let deleted = doc.is_deleted();
            let doc = self.outgoing_doc(&sharing, &key, doc, &entry.info);
            docs.push((deleted, depth, doc));
        }
        // Directories parent-first, deletions last.
        docs.sort_by_key(|(deleted, depth, _)| (*deleted, *depth));

        let sent = docs.len();
        if sent > 0 {
            let mut request = BulkDocsRequest::new();
            for (_, _, doc) in docs {
                request
                    .entry(doc.doctype.clone())
                    .or_insert_with(Vec::new)
                    .push(doc.to_value());
            }
            let transport = self.transport.as_ref();
            let request = &request;
            self.call_with_refresh(sharing_id, member, |target| async move {
                transport.bulk_docs(&target, sharing_id, request).await
            })
            .await?;
        }

        self.update_last_seq(sharing_id, member, REPLICATOR, &last_seq)
            .await?;
        info!(sharing_id, member, sent, pending, "replication round done");
        Ok(RoundReport { sent, pending })
    }

    /// Which of the announced revisions we lack. The leaves we hold below
    /// the newest missing generation are offered as possible ancestors.
    pub async fn answer_revs_diff(&self, request: RevsDiffRequest) -> Result<RevsDiffResponse> {
        let mut response = RevsDiffResponse::new();
        for (key, revs) in request {
            let doc_ref: DocRef = key
                .parse()
                .map_err(|_| SyncError::InvalidMessage(format!("invalid key {}", key)))?;
            let (missing, possible_ancestors) = match self.load_ref(&doc_ref).await? {
                Some(shared) => {
                    let missing: Vec<String> = revs
                        .into_iter()
                        .filter(|r| !shared.revisions.contains(r))
                        .collect();
                    let newest = missing.iter().map(|r| rev_generation(r)).max().unwrap_or(0);
                    let ancestors = shared
                        .revisions
                        .leaves()
                        .into_iter()
                        .filter(|leaf| rev_generation(leaf) < newest)
                        .map(String::from)
                        .collect();
                    (missing, ancestors)
                }
                None => (revs, Vec::new()),
            };
            if !missing.is_empty() {
                response.insert(
                    key,
                    MissingRevs {
                        missing,
                        possible_ancestors,
                    },
                );
            }
        }
        Ok(response)
    }

    /// Apply documents sent by a member. Every valid document is applied;
    /// failures are reported together.
    pub async fn apply_bulk_docs(
        &self,
        sharing: &Sharing,
        member: usize,
        request: BulkDocsRequest,
    ) -> Result<()> {
        if sharing.is_read_only_for(member) {
            return Err(SyncError::Forbidden(format!(
                "member {} is read-only on {}",
                member, sharing.id
            )));
        }
        let _guard = self.locks.write(SHARED_LOCK).await;
        let mut errors = Vec::new();
        for (doctype, values) in request {
            if doctype == FILES {
                for value in values {
                    if let Err(e) = self.apply_file_doc(sharing, member, value).await {
                        debug!(sharing_id = %sharing.id, error = %e, "file document refused");
                        errors.push(e);
                    }
                }
            } else if let Err(e) = self.apply_docs(sharing, &doctype, values).await {
                errors.push(e);
            }
        }
        SyncError::collect(errors)
    }

    async fn apply_docs(&self, sharing: &Sharing, doctype: &str, values: Vec<Value>) -> Result<()> {
        let mut errors = Vec::new();
        let mut incoming = Vec::with_capacity(values.len());
        for value in values {
            match Document::from_value(doctype, value) {
                Ok(doc) if doc.rev.is_some() => incoming.push(doc),
                Ok(doc) => errors.push(SyncError::InvalidMessage(format!(
                    "{} has no revision",
                    doc.doc_ref()
                ))),
                Err(e) => errors.push(e.into()),
            }
        }
        let ids: Vec<String> = incoming.iter().map(|d| d.id.clone()).collect();
        let local: BTreeMap<String, Document> = if ids.is_empty() {
            BTreeMap::new()
        } else {
            self.store
                .bulk_get(doctype, &ids)
                .await?
                .into_iter()
                .map(|d| (d.id.clone(), d))
                .collect()
        };

        let mut writes = Vec::new();
        let mut records = Vec::new();
        for doc in incoming {
            let chain = doc
                .revisions()
                .unwrap_or_else(|| vec![doc.rev_str().to_string()]);
            match local.get(&doc.id) {
                None if doc.is_deleted() => continue,
                None => {
                    let Some(rule) = sharing.first_matching_rule(&doc, &[]) else {
                        errors.push(SyncError::Safety(format!(
                            "{} does not match the rules of {}",
                            doc.doc_ref(),
                            sharing.id
                        )));
                        continue;
                    };
                    records.push((doc.doc_ref(), chain, SharedInfo::new(rule, false)));
                    writes.push(doc);
                }
                Some(current) => {
                    let known_rule = self
                        .load_ref(&doc.doc_ref())
                        .await?
                        .and_then(|r| r.infos.get(&sharing.id).map(|i| i.rule));
                    let Some(rule) = known_rule else {
                        errors.push(SyncError::Safety(format!(
                            "{} exists here but is not shared by {}",
                            doc.doc_ref(),
                            sharing.id
                        )));
                        continue;
                    };
                    let status = detect_conflict(current.rev_str(), &chain);
                    let removed = if status.is_lost() {
                        current.is_deleted()
                    } else {
                        doc.is_deleted()
                    };
                    let info = SharedInfo {
                        rule,
                        removed,
                        binary: false,
                    };
                    records.push((doc.doc_ref(), chain, info));
                    if !status.is_lost() && current.rev != doc.rev {
                        writes.push(doc);
                    }
                }
            }
        }

        if !writes.is_empty() {
            self.store.bulk_force_update(doctype, writes).await?;
        }
        for (doc_ref, chain, info) in records {
            self.record_revisions(&sharing.id, &doc_ref, &chain, info).await?;
        }
        SyncError::collect(errors)
    }

    /// A shared document, as the calling member must see it.
    pub async fn shared_document(
        &self,
        sharing: &Sharing,
        member: usize,
        doctype: &str,
        id: &str,
    ) -> Result<Value> {
        let doc_ref = DocRef::new(doctype, id);
        let shared = self
            .load_ref(&doc_ref)
            .await?
            .ok_or_else(|| SyncError::NotFound(doc_ref.key()))?;
        let info = match shared.infos.get(&sharing.id) {
            Some(info) if !info.removed => *info,
            _ => return Err(SyncError::NotFound(doc_ref.key())),
        };
        let entry = Entry {
            doc_ref,
            shared,
            info,
            seq: String::new(),
        };
        let doc = self.entry_document(&entry).await?;
        if doc.is_deleted() {
            return Err(SyncError::NotFound(entry.doc_ref.key()));
        }
        let key = self.xor_key(sharing, member)?;
        Ok(self.outgoing_doc(sharing, &key, doc, &info).to_value())
    }
}
