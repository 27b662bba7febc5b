//! File transfers.
//!
//! The uploader sends the metadata of a shared file first. The member
//! answers with a key when it needs the content, which is then sent under
//! that key. Files are sent one at a time and the cursor advances after
//! each of them.

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sharing_core::consts::FILES;
use sharing_core::{conflict_id, conflict_name, detect_conflict, ConflictStatus, DocRef};
use sharing_perms::Sharing;
use sharing_store::{checksum, DocumentStore, FileDoc, Vfs};

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::files::{file_chain, merge_remote};
use crate::lock::{upload_lock, SHARED_LOCK};
use crate::messages::UploadKey;
use crate::replicator::{winning_chain, RoundReport};
use crate::seq::UPLOADER;
use crate::upload_store::PendingUpload;

impl<S: DocumentStore, V: Vfs> SyncContext<S, V> {
    /// One upload round towards a member.
    pub async fn upload_to(&self, sharing_id: &str, member: usize) -> Result<RoundReport> {
        let _guard = self.locks.write(&upload_lock(sharing_id)).await;
        let sharing = self.load_active_sharing(sharing_id).await?;
        if sharing.is_read_only_here(&self.instance_url) {
            return Ok(RoundReport::default());
        }
        let key = self.xor_key(&sharing, member)?;
        let since = self.get_last_seq(sharing_id, member, UPLOADER).await?;
        let (entries, last_seq, pending) = self
            .next_entries(&sharing, &since, self.config.upload_batch_size, true)
            .await?;

        let mut sent = 0;
        for entry in &entries {
            let Some(file) = self.vfs.get(&entry.doc_ref.id).await? else {
                self.update_last_seq(sharing_id, member, UPLOADER, &entry.seq)
                    .await?;
                continue;
            };
            let mut doc = file.to_document_with_revisions()?;
            if doc.revisions().is_none() {
                doc.set_revisions(&winning_chain(&entry.shared));
            }
            let doc = self.outgoing_doc(&sharing, &key, doc, &entry.info);
            let (remote_id, body) = (doc.id.clone(), doc.to_value());

            let transport = self.transport.as_ref();
            let (remote_id, body) = (remote_id.as_str(), &body);
            let upload_key = self
                .call_with_refresh(sharing_id, member, |target| async move {
                    transport
                        .upload_metadata(&target, sharing_id, remote_id, body)
                        .await
                })
                .await?;
            if let Some(UploadKey { key: upload_key }) = upload_key {
                let content = self.vfs.open(&file.id).await?;
                let upload_key = upload_key.as_str();
                self.call_with_refresh(sharing_id, member, |target| {
                    let content = content.clone();
                    async move {
                        transport
                            .upload_content(&target, sharing_id, upload_key, content)
                            .await
                    }
                })
                .await?;
                debug!(sharing_id, member, id = %file.id, size = file.size, "file content sent");
            }
            sent += 1;
            self.update_last_seq(sharing_id, member, UPLOADER, &entry.seq)
                .await?;
        }

        self.update_last_seq(sharing_id, member, UPLOADER, &last_seq)
            .await?;
        info!(sharing_id, member, sent, pending, "upload round done");
        Ok(RoundReport { sent, pending })
    }

    // Inbound

    /// Metadata of a file sent by a member. Returns a key when the content
    /// is needed, nothing when the metadata alone was applied.
    pub async fn receive_file_metadata(
        &self,
        sharing: &Sharing,
        member: usize,
        id: &str,
        value: Value,
    ) -> Result<Option<UploadKey>> {
        if sharing.is_read_only_for(member) {
            return Err(SyncError::Forbidden(format!(
                "member {} is read-only on {}",
                member, sharing.id
            )));
        }
        let remote = Self::decode_file(value.clone())?;
        if remote.id != id || remote.is_dir() {
            return Err(SyncError::InvalidMessage(format!(
                "{} is not a file document for {}",
                remote.id, id
            )));
        }

        let _guard = self.locks.write(SHARED_LOCK).await;
        if let Some(local) = self.vfs.get(id).await? {
            if local.rev == remote.rev {
                return Ok(None);
            }
            if local.checksum.is_some() && local.checksum == remote.checksum {
                self.apply_metadata(sharing, member, remote).await?;
                return Ok(None);
            }
        }

        let key = Uuid::new_v4().simple().to_string();
        self.uploads
            .put(
                &key,
                PendingUpload {
                    sharing_id: sharing.id.clone(),
                    member,
                    doc: value,
                },
            )
            .await?;
        debug!(sharing_id = %sharing.id, id, "waiting for file content");
        Ok(Some(UploadKey { key }))
    }

    /// Content of a file announced earlier with its metadata.
    pub async fn receive_file_content(
        &self,
        sharing: &Sharing,
        member: usize,
        key: &str,
        content: Bytes,
    ) -> Result<()> {
        let pending = self
            .uploads
            .take(key)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("upload {}", key)))?;
        if pending.sharing_id != sharing.id || pending.member != member {
            return Err(SyncError::Forbidden(format!("upload {} is not yours", key)));
        }
        let mut remote = Self::decode_file(pending.doc)?;
        let sum = checksum(&content);
        if remote.checksum.as_deref().is_some_and(|c| c != sum) {
            return Err(SyncError::InvalidMessage(format!(
                "content of {} does not match its checksum",
                remote.id
            )));
        }

        let _guard = self.locks.write(SHARED_LOCK).await;
        let sharing_key = self.xor_key(sharing, member)?;
        let chain = file_chain(&remote);
        let doc_ref = DocRef::new(FILES, &remote.id);

        let Some(local) = self.vfs.get(&remote.id).await? else {
            remote.dir_id = self.resolve_parent(sharing, member, &remote.dir_id).await?;
            let info = self.rule_for_new(sharing, &remote).await?;
            self.place_name(sharing, &sharing_key, &mut remote).await?;
            self.vfs.force_put(remote, Some(content)).await?;
            self.record_revisions(&sharing.id, &doc_ref, &chain, info).await?;
            return Ok(());
        };

        let known = self
            .load_ref(&doc_ref)
            .await?
            .and_then(|r| r.infos.get(&sharing.id).copied());
        let info = match known {
            Some(info) => info,
            None => self.rule_for_new(sharing, &local).await?,
        };
        let dir_id = if remote.dir_id.is_empty() {
            local.dir_id.clone()
        } else {
            self.resolve_parent(sharing, member, &remote.dir_id).await?
        };

        match detect_conflict(local.rev_str(), &chain) {
            ConflictStatus::NoConflict => {
                // Content first, in place; then the rename or move.
                let mut merged = merge_remote(&local, &remote, &local.dir_id);
                merged.name = local.name.clone();
                self.vfs.force_put(merged.clone(), Some(content)).await?;
                if merged.name != remote.name || merged.dir_id != dir_id {
                    merged.name = remote.name.clone();
                    merged.dir_id = dir_id;
                    merged.revisions = Vec::new();
                    self.place_name(sharing, &sharing_key, &mut merged).await?;
                    self.vfs.force_put(merged, None).await?;
                }
            }
            ConflictStatus::WonConflict => {
                self.keep_conflict_copy(&local).await?;
                let mut merged = merge_remote(&local, &remote, &dir_id);
                self.place_name(sharing, &sharing_key, &mut merged).await?;
                self.vfs.force_put(merged, Some(content)).await?;
            }
            ConflictStatus::LostConflict => {
                warn!(sharing_id = %sharing.id, id = %remote.id, "incoming file lost a conflict, kept as a copy");
                let copy = FileDoc {
                    id: conflict_id(&remote.id, remote.rev_str()),
                    rev: None,
                    dir_id: local.dir_id.clone(),
                    path: None,
                    revisions: Vec::new(),
                    ..remote
                };
                self.create_copy(copy, content).await?;
            }
        }
        self.record_revisions(&sharing.id, &doc_ref, &chain, info).await?;
        Ok(())
    }

    /// Save the local version of a file aside before it is overwritten.
    async fn keep_conflict_copy(&self, local: &FileDoc) -> Result<()> {
        let content = self.vfs.open(&local.id).await?;
        let copy = FileDoc {
            id: conflict_id(&local.id, local.rev_str()),
            rev: None,
            path: None,
            revisions: Vec::new(),
            ..local.clone()
        };
        info!(id = %local.id, copy = %copy.id, "local file kept as a conflict copy");
        self.create_copy(copy, content).await
    }

    async fn create_copy(&self, mut copy: FileDoc, content: Bytes) -> Result<()> {
        let siblings = self.vfs.children(&copy.dir_id).await?;
        let taken: Vec<&str> = siblings.iter().map(|s| s.name.as_str()).collect();
        copy.name = conflict_name(&copy.name, true, |n| taken.contains(&n))?;
        self.vfs.create_file(copy, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::SharedInfo;
    use crate::testing::{context, TestContext};
    use sharing_core::consts::ROOT_DIR_ID;
    use sharing_core::{Rule, XorKey};
    use sharing_perms::{Member, MemberStatus};

    async fn owner() -> (TestContext, Sharing, FileDoc) {
        let ctx = context("https://alice.example.net");
        let root = ctx
            .vfs
            .create_dir(FileDoc::new_dir("Shared", ROOT_DIR_ID))
            .await
            .unwrap();
        let mut sharing = Sharing::new(
            "Shared",
            vec![Rule::files_by_id("Shared", root.id.clone())],
            Member::owner("https://alice.example.net", "Alice"),
        );
        sharing.id = "s1".into();
        sharing.active = true;
        sharing
            .add_member(Member::new(MemberStatus::Ready).with_instance("https://bob.example.net"))
            .unwrap();
        sharing
            .add_member(
                Member::new(MemberStatus::Ready)
                    .with_instance("https://carol.example.net")
                    .read_only(true),
            )
            .unwrap();
        for creds in &mut sharing.credentials {
            creds.xor_key = Some(XorKey::generate());
        }
        (ctx, sharing, root)
    }

    fn incoming(id: &str, name: &str, dir_id: &str, rev: &str, content: &[u8]) -> Value {
        let mut file = FileDoc::new_file(name, dir_id).with_id(id);
        file.rev = Some(rev.to_string());
        file.revisions = vec![rev.to_string()];
        file.size = content.len() as u64;
        file.checksum = Some(checksum(content));
        file.to_document_with_revisions().unwrap().to_value()
    }

    #[tokio::test]
    async fn test_new_file_in_two_steps() {
        let (ctx, sharing, root) = owner().await;
        let key = ctx
            .receive_file_metadata(&sharing, 1, "f1", incoming("f1", "a.txt", &root.id, "1-a", b"hello"))
            .await
            .unwrap()
            .expect("content is needed");
        assert!(ctx.vfs.get("f1").await.unwrap().is_none());

        ctx.receive_file_content(&sharing, 1, &key.key, Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let file = ctx.vfs.get("f1").await.unwrap().unwrap();
        assert_eq!(file.rev_str(), "1-a");
        assert_eq!(ctx.vfs.open("f1").await.unwrap(), Bytes::from_static(b"hello"));
        let shared = ctx.load_ref(&DocRef::new(FILES, "f1")).await.unwrap().unwrap();
        assert_eq!(shared.infos["s1"], SharedInfo::new(0, true));

        // The key is single use.
        let err = ctx
            .receive_file_content(&sharing, 1, &key.key, Bytes::from_static(b"hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_read_only_member_cannot_upload() {
        let (ctx, sharing, root) = owner().await;
        let err = ctx
            .receive_file_metadata(&sharing, 2, "f1", incoming("f1", "a.txt", &root.id, "1-a", b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_same_content_needs_no_upload() {
        let (ctx, sharing, root) = owner().await;
        let key = ctx
            .receive_file_metadata(&sharing, 1, "f1", incoming("f1", "a.txt", &root.id, "1-a", b"same"))
            .await
            .unwrap()
            .unwrap();
        ctx.receive_file_content(&sharing, 1, &key.key, Bytes::from_static(b"same"))
            .await
            .unwrap();

        let mut renamed =
            TestContext::decode_file(incoming("f1", "b.txt", &root.id, "2-b", b"same")).unwrap();
        renamed.revisions = vec!["1-a".into(), "2-b".into()];
        let value = renamed.to_document_with_revisions().unwrap().to_value();
        let answer = ctx.receive_file_metadata(&sharing, 1, "f1", value).await.unwrap();
        assert_eq!(answer, None);
        let file = ctx.vfs.get("f1").await.unwrap().unwrap();
        assert_eq!(file.name, "b.txt");
        assert_eq!(file.rev_str(), "2-b");
    }

    #[tokio::test]
    async fn test_rename_with_new_content() {
        let (ctx, sharing, root) = owner().await;
        let key = ctx
            .receive_file_metadata(&sharing, 1, "f1", incoming("f1", "a.txt", &root.id, "1-a", b"v1"))
            .await
            .unwrap()
            .unwrap();
        ctx.receive_file_content(&sharing, 1, &key.key, Bytes::from_static(b"v1"))
            .await
            .unwrap();

        let mut next =
            TestContext::decode_file(incoming("f1", "b.txt", &root.id, "2-b", b"v2")).unwrap();
        next.revisions = vec!["1-a".into(), "2-b".into()];
        let value = next.to_document_with_revisions().unwrap().to_value();
        let key = ctx
            .receive_file_metadata(&sharing, 1, "f1", value)
            .await
            .unwrap()
            .unwrap();
        ctx.receive_file_content(&sharing, 1, &key.key, Bytes::from_static(b"v2"))
            .await
            .unwrap();

        let file = ctx.vfs.get("f1").await.unwrap().unwrap();
        assert_eq!(file.name, "b.txt");
        assert_eq!(file.rev_str(), "2-b");
        assert_eq!(ctx.vfs.open("f1").await.unwrap(), Bytes::from_static(b"v2"));
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_refused() {
        let (ctx, sharing, root) = owner().await;
        let key = ctx
            .receive_file_metadata(&sharing, 1, "f1", incoming("f1", "a.txt", &root.id, "1-a", b"one"))
            .await
            .unwrap()
            .unwrap();
        let err = ctx
            .receive_file_content(&sharing, 1, &key.key, Bytes::from_static(b"two"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn test_lost_conflict_creates_a_copy() {
        let (ctx, sharing, root) = owner().await;
        let local = ctx
            .vfs
            .create_file(FileDoc::new_file("notes.txt", root.id.clone()), Bytes::from_static(b"mine"))
            .await
            .unwrap();
        let local = ctx
            .vfs
            .write_content(&local.id, Bytes::from_static(b"mine, edited"))
            .await
            .unwrap();

        // Generation 1 cannot win against the local generation 2.
        let value = incoming(&local.id, "notes.txt", &root.id, "1-ff", b"theirs");
        let key = ctx
            .receive_file_metadata(&sharing, 1, &local.id, value)
            .await
            .unwrap()
            .unwrap();
        ctx.receive_file_content(&sharing, 1, &key.key, Bytes::from_static(b"theirs"))
            .await
            .unwrap();

        assert_eq!(
            ctx.vfs.open(&local.id).await.unwrap(),
            Bytes::from_static(b"mine, edited")
        );
        let names: Vec<String> = ctx
            .vfs
            .children(&root.id)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["notes (2).txt", "notes.txt"]);
    }
}
