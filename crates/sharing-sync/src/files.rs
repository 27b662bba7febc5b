//! Incoming files and directories.
//!
//! Documents received from a member already carry ids of our space. A
//! directory whose parent is unknown here is fetched from the member first.
//! Two entries competing for a name in the same directory are split by
//! their id in the owner's space: the higher id keeps the name.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, info};

use sharing_core::consts::{
    FILES, NO_LONGER_SHARED_DIR_ID, NO_LONGER_SHARED_DIR_NAME, ROOT_DIR_ID, SHARED_WITH_ME_DIR_ID,
    SHARED_WITH_ME_DIR_NAME,
};
use sharing_core::{conflict_name, detect_conflict, xor_id, DocRef, Document, XorKey};
use sharing_perms::Sharing;
use sharing_store::{DocumentStore, FileDoc, Vfs};

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::shared::{SharedInfo, SharedRef};

/// Id of a file in the owner's space.
pub(crate) fn owner_space_id(sharing: &Sharing, key: &XorKey, id: &str) -> String {
    if sharing.owner {
        id.to_string()
    } else {
        xor_id(id, key)
    }
}

/// The incoming version of a file, with the fields only meaningful here
/// taken from the local one.
pub(crate) fn merge_remote(local: &FileDoc, remote: &FileDoc, dir_id: &str) -> FileDoc {
    let mut merged = remote.clone();
    merged.dir_id = dir_id.to_string();
    merged.path = None;
    merged.trashed = false;
    merged.restore_path = None;
    merged.created_at = local.created_at;
    for reference in &local.referenced_by {
        if !merged.referenced_by.contains(reference) {
            merged.referenced_by.push(reference.clone());
        }
    }
    merged
}

pub(crate) fn file_chain(file: &FileDoc) -> Vec<String> {
    if file.revisions.is_empty() {
        file.rev.iter().cloned().collect()
    } else {
        file.revisions.clone()
    }
}

impl<S: DocumentStore, V: Vfs> SyncContext<S, V> {
    /// Where entries without a known parent go.
    pub(crate) async fn fallback_dir(&self, sharing: &Sharing) -> Result<String> {
        if let Some(root) = sharing.root_dir_id() {
            return Ok(root.to_string());
        }
        if sharing.owner {
            return Ok(ROOT_DIR_ID.to_string());
        }
        let dir = self
            .vfs
            .ensure_dir(SHARED_WITH_ME_DIR_ID, SHARED_WITH_ME_DIR_NAME)
            .await?;
        Ok(dir.id)
    }

    /// Make sure the parent of an incoming entry exists, fetching the
    /// missing directories from the member. Returns the local parent id.
    pub(crate) async fn resolve_parent(
        &self,
        sharing: &Sharing,
        member: usize,
        dir_id: &str,
    ) -> Result<String> {
        let key = self.xor_key(sharing, member)?;
        let mut missing: Vec<FileDoc> = Vec::new();
        let mut current = dir_id.to_string();
        let mut parent = loop {
            if current.is_empty() {
                break self.fallback_dir(sharing).await?;
            }
            if self.vfs.get(&current).await?.is_some() {
                break current;
            }
            if missing.len() >= self.config.max_missing_ancestors {
                return Err(SyncError::Safety(format!(
                    "too many missing parents above {}",
                    dir_id
                )));
            }
            let dir = self.fetch_dir(sharing, member, &current).await?;
            current = dir.dir_id.clone();
            missing.push(dir);
        };

        while let Some(mut dir) = missing.pop() {
            debug!(sharing_id = %sharing.id, dir = %dir.id, "creating missing parent");
            dir.dir_id = parent;
            self.place_name(sharing, &key, &mut dir).await?;
            let chain = file_chain(&dir);
            let info = self.rule_for_new(sharing, &dir).await?;
            let written = self.vfs.force_put(dir, None).await?;
            self.record_revisions(&sharing.id, &DocRef::new(FILES, &written.id), &chain, info)
                .await?;
            parent = written.id;
        }
        Ok(parent)
    }

    /// Fetch a directory missing here: from the sender first, then on the
    /// owner from every other ready member.
    async fn fetch_dir(&self, sharing: &Sharing, member: usize, id: &str) -> Result<FileDoc> {
        let mut candidates = vec![member];
        if sharing.owner {
            candidates.extend(sharing.ready_members().into_iter().filter(|m| *m != member));
        }
        let mut last_err = SyncError::NotFound(format!("directory {}", id));
        for candidate in candidates {
            let Ok(key) = self.xor_key(sharing, candidate) else {
                continue;
            };
            let remote_id = xor_id(id, &key);
            let transport = self.transport.as_ref();
            let sharing_id = sharing.id.as_str();
            let remote_id = remote_id.as_str();
            let fetched = self
                .call_with_refresh(sharing_id, candidate, |target| async move {
                    transport
                        .get_document(&target, sharing_id, FILES, remote_id)
                        .await
                })
                .await
                .and_then(Self::decode_file);
            match fetched {
                Ok(dir) if dir.is_dir() && dir.id == id => return Ok(dir),
                Ok(dir) => {
                    last_err = SyncError::InvalidMessage(format!(
                        "{} is not the directory asked for",
                        dir.id
                    ));
                }
                Err(e) => {
                    debug!(sharing_id, member = candidate, id, error = %e, "directory not fetched");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    pub(crate) fn decode_file(value: Value) -> Result<FileDoc> {
        let doc = Document::from_value(FILES, value)?;
        let file = FileDoc::from_document(&doc)?;
        if file.id.is_empty() || file.rev.is_none() {
            return Err(SyncError::InvalidMessage(
                "file document without id or revision".into(),
            ));
        }
        Ok(file)
    }

    /// The rule a new entry falls under, at its planned place.
    pub(crate) async fn rule_for_new(&self, sharing: &Sharing, file: &FileDoc) -> Result<SharedInfo> {
        let mut ancestors = vec![file.dir_id.clone()];
        ancestors.extend(self.vfs.ancestors(&file.dir_id).await?);
        let doc = file.to_document()?;
        let rule = sharing.first_matching_rule(&doc, &ancestors).ok_or_else(|| {
            SyncError::Safety(format!(
                "{} does not match the rules of {}",
                doc.doc_ref(),
                sharing.id
            ))
        })?;
        Ok(SharedInfo::new(rule, !file.is_dir()))
    }

    /// The rule of an entry already shared, or the one it falls under now.
    async fn rule_for_existing(&self, sharing: &Sharing, file: &FileDoc) -> Result<SharedInfo> {
        let doc_ref = DocRef::new(FILES, &file.id);
        let known = self
            .load_ref(&doc_ref)
            .await?
            .and_then(|r| r.infos.get(&sharing.id).map(|i| i.rule));
        match known {
            Some(rule) => Ok(SharedInfo::new(rule, !file.is_dir())),
            None => self.rule_for_new(sharing, file).await,
        }
    }

    /// Settle a name collision in the target directory. Either the incoming
    /// entry or the local one is renamed.
    pub(crate) async fn place_name(
        &self,
        sharing: &Sharing,
        key: &XorKey,
        file: &mut FileDoc,
    ) -> Result<()> {
        let siblings = self.vfs.children(&file.dir_id).await?;
        let Some(other) = siblings
            .iter()
            .find(|s| s.name == file.name && s.id != file.id)
        else {
            return Ok(());
        };
        let taken: HashSet<&str> = siblings.iter().map(|s| s.name.as_str()).collect();
        if owner_space_id(sharing, key, &file.id) > owner_space_id(sharing, key, &other.id) {
            let mut renamed = other.clone();
            renamed.name = conflict_name(&other.name, !other.is_dir(), |n| taken.contains(n))?;
            renamed.path = None;
            info!(id = %other.id, name = %renamed.name, "renaming local entry on name conflict");
            self.vfs.update(renamed).await?;
        } else {
            file.name = conflict_name(&file.name, !file.is_dir(), |n| taken.contains(n))?;
            info!(id = %file.id, name = %file.name, "renaming incoming entry on name conflict");
        }
        Ok(())
    }

    /// Apply a file document from `_bulk_docs`: a directory, a removal, or
    /// new metadata of a file already here.
    pub(crate) async fn apply_file_doc(&self, sharing: &Sharing, member: usize, value: Value) -> Result<()> {
        let doc = Document::from_value(FILES, value)?;
        let chain = doc
            .revisions()
            .or_else(|| doc.rev.clone().map(|r| vec![r]))
            .ok_or_else(|| SyncError::InvalidMessage(format!("{} has no revision", doc.doc_ref())))?;
        if doc.is_deleted() {
            return self.remove_file(sharing, &doc.id, &chain).await;
        }
        let remote = FileDoc::from_document(&doc)?;
        if !remote.is_dir() && self.vfs.get(&remote.id).await?.is_none() {
            debug!(id = %remote.id, "new file announced without content, waiting for upload");
            return Ok(());
        }
        self.apply_metadata(sharing, member, remote).await
    }

    /// Create or update an entry without touching its content.
    pub(crate) async fn apply_metadata(
        &self,
        sharing: &Sharing,
        member: usize,
        mut remote: FileDoc,
    ) -> Result<()> {
        let key = self.xor_key(sharing, member)?;
        let chain = file_chain(&remote);
        let doc_ref = DocRef::new(FILES, &remote.id);
        match self.vfs.get(&remote.id).await? {
            None => {
                remote.dir_id = self.resolve_parent(sharing, member, &remote.dir_id).await?;
                let info = self.rule_for_new(sharing, &remote).await?;
                self.place_name(sharing, &key, &mut remote).await?;
                self.vfs.force_put(remote, None).await?;
                self.record_revisions(&sharing.id, &doc_ref, &chain, info).await?;
            }
            Some(local) => {
                let info = self.rule_for_existing(sharing, &local).await?;
                let status = detect_conflict(local.rev_str(), &chain);
                if !status.is_lost() && local.rev != remote.rev {
                    let dir_id = if remote.dir_id.is_empty() {
                        local.dir_id.clone()
                    } else {
                        self.resolve_parent(sharing, member, &remote.dir_id).await?
                    };
                    let mut merged = merge_remote(&local, &remote, &dir_id);
                    self.place_name(sharing, &key, &mut merged).await?;
                    self.vfs.force_put(merged, None).await?;
                }
                self.record_revisions(&sharing.id, &doc_ref, &chain, info).await?;
            }
        }
        Ok(())
    }

    /// A member removed a shared entry.
    pub(crate) async fn remove_file(&self, sharing: &Sharing, id: &str, chain: &[String]) -> Result<()> {
        let doc_ref = DocRef::new(FILES, id);
        let known = self.load_ref(&doc_ref).await?;
        let Some(local) = self.vfs.get(id).await? else {
            if let Some(info) = known.and_then(|r| r.infos.get(&sharing.id).copied()) {
                let removed = info.into_removed();
                self.record_revisions(&sharing.id, &doc_ref, chain, removed).await?;
            }
            return Ok(());
        };
        let info = match known.as_ref().and_then(|r| r.infos.get(&sharing.id)) {
            Some(info) => *info,
            None => {
                debug!(id, "removal of an entry never shared, ignored");
                return Ok(());
            }
        };
        if detect_conflict(local.rev_str(), chain).is_lost() {
            // Changed here since: the local version stays.
            self.record_revisions(&sharing.id, &doc_ref, chain, info).await?;
            return Ok(());
        }
        if local.trashed || self.vfs.is_trashed(id).await? {
            let removed = info.into_removed();
            self.record_revisions(&sharing.id, &doc_ref, chain, removed).await?;
            return Ok(());
        }

        let by_reference = sharing
            .rules
            .get(info.rule)
            .filter(|r| r.selects_by_reference());
        let written = match by_reference {
            Some(rule) if sharing.owner => {
                let mut next = local.clone();
                next.referenced_by.retain(|r| !rule.values.contains(&r.key()));
                next.path = None;
                self.vfs.update(next).await?
            }
            _ if !local.referenced_by.is_empty() => {
                let dir = self
                    .vfs
                    .ensure_dir(NO_LONGER_SHARED_DIR_ID, NO_LONGER_SHARED_DIR_NAME)
                    .await?;
                let mut next = local.clone();
                next.dir_id = dir.id;
                next.path = None;
                let siblings = self.vfs.children(&next.dir_id).await?;
                let taken: HashSet<&str> = siblings.iter().map(|s| s.name.as_str()).collect();
                if taken.contains(next.name.as_str()) {
                    next.name = conflict_name(&next.name, !next.is_dir(), |n| taken.contains(n))?;
                }
                self.vfs.update(next).await?
            }
            _ => self.vfs.trash(id).await?,
        };
        info!(sharing_id = %sharing.id, id, "shared entry removed by a member");

        let removed = info.into_removed();
        let mut shared: SharedRef = self
            .record_revisions(&sharing.id, &doc_ref, chain, removed)
            .await?;
        shared.record_rev(written.rev_str(), local.rev.as_deref());
        self.save_ref(&mut shared).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, TestContext};
    use bytes::Bytes;
    use sharing_core::consts::TRASH_DIR_ID;
    use sharing_core::{DocReference, Rule};
    use sharing_perms::{Member, MemberStatus};
    use serde_json::json;

    async fn owner_with_dir() -> (TestContext, Sharing, FileDoc) {
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
            .add_member(
                Member::new(MemberStatus::Ready).with_instance("https://bob.example.net"),
            )
            .unwrap();
        sharing.credentials[0].xor_key = Some(XorKey::generate());
        (ctx, sharing, root)
    }

    fn dir_value(id: &str, name: &str, dir_id: &str, revs: &[&str]) -> Value {
        let tip = revs.last().unwrap();
        json!({
            "_id": id,
            "_rev": tip,
            "_revisions": {
                "start": sharing_core::rev_generation(tip),
                "ids": revs.iter().rev().map(|r| sharing_core::rev_hash(r)).collect::<Vec<_>>(),
            },
            "type": "directory",
            "name": name,
            "dir_id": dir_id,
        })
    }

    #[tokio::test]
    async fn test_new_directory_is_created_and_tracked() {
        let (ctx, sharing, root) = owner_with_dir().await;
        ctx.apply_file_doc(&sharing, 1, dir_value("d1", "Photos", &root.id, &["1-a"]))
            .await
            .unwrap();

        let dir = ctx.vfs.get("d1").await.unwrap().unwrap();
        assert_eq!(dir.name, "Photos");
        assert_eq!(dir.rev_str(), "1-a");
        let shared = ctx.load_ref(&DocRef::new(FILES, "d1")).await.unwrap().unwrap();
        assert_eq!(shared.infos["s1"], SharedInfo::new(0, false));
    }

    #[tokio::test]
    async fn test_directory_outside_the_rules_is_refused() {
        let (ctx, sharing, _) = owner_with_dir().await;
        let err = ctx
            .apply_file_doc(&sharing, 1, dir_value("d1", "Elsewhere", ROOT_DIR_ID, &["1-a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Safety(_)));
        assert!(ctx.vfs.get("d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_name_conflict_is_settled_by_owner_space_id() {
        let (ctx, sharing, root) = owner_with_dir().await;
        let local = ctx
            .vfs
            .create_dir(FileDoc::new_dir("Docs", root.id.clone()).with_id("m-local"))
            .await
            .unwrap();

        // A lower id loses the name.
        ctx.apply_file_doc(&sharing, 1, dir_value("a-remote", "Docs", &root.id, &["1-a"]))
            .await
            .unwrap();
        assert_eq!(ctx.vfs.get("a-remote").await.unwrap().unwrap().name, "Docs (2)");

        // A higher id takes it.
        ctx.apply_file_doc(&sharing, 1, dir_value("z-remote", "Docs", &root.id, &["1-b"]))
            .await
            .unwrap();
        assert_eq!(ctx.vfs.get("z-remote").await.unwrap().unwrap().name, "Docs");
        assert_ne!(ctx.vfs.get(&local.id).await.unwrap().unwrap().name, "Docs");
    }

    #[tokio::test]
    async fn test_lost_conflict_keeps_local_version() {
        let (ctx, sharing, root) = owner_with_dir().await;
        ctx.apply_file_doc(&sharing, 1, dir_value("d1", "Old", &root.id, &["1-a"]))
            .await
            .unwrap();
        let local = ctx.vfs.get("d1").await.unwrap().unwrap();
        let mut renamed = local.clone();
        renamed.name = "Renamed here".into();
        renamed.path = None;
        let renamed = ctx.vfs.update(renamed).await.unwrap();

        // "2-0" sorts before any other second revision.
        ctx.apply_file_doc(&sharing, 1, dir_value("d1", "Remote", &root.id, &["1-a", "2-0"]))
            .await
            .unwrap();
        let after = ctx.vfs.get("d1").await.unwrap().unwrap();
        assert_eq!(after.rev, renamed.rev);
        assert_eq!(after.name, "Renamed here");
        let shared = ctx.load_ref(&DocRef::new(FILES, "d1")).await.unwrap().unwrap();
        assert!(shared.revisions.contains("2-0"));
    }

    #[tokio::test]
    async fn test_removal_trashes_the_entry() {
        let (ctx, sharing, root) = owner_with_dir().await;
        ctx.apply_file_doc(&sharing, 1, dir_value("d1", "Gone", &root.id, &["1-a"]))
            .await
            .unwrap();
        let tombstone = Document::tombstone(FILES, "d1", &["1-a".to_string(), "2-b".to_string()]);
        ctx.apply_file_doc(&sharing, 1, tombstone.to_value()).await.unwrap();

        let dir = ctx.vfs.get("d1").await.unwrap().unwrap();
        assert_eq!(dir.dir_id, TRASH_DIR_ID);
        let shared = ctx.load_ref(&DocRef::new(FILES, "d1")).await.unwrap().unwrap();
        assert!(shared.infos["s1"].removed);
        assert!(shared.revisions.contains(dir.rev_str()));
    }

    #[tokio::test]
    async fn test_referenced_file_goes_to_no_longer_shared() {
        let (ctx, sharing, root) = owner_with_dir().await;
        let file = ctx
            .vfs
            .create_file(
                FileDoc::new_file("pic.jpg", root.id.clone())
                    .with_reference(DocReference::new("io.cozy.photos.albums", "album1")),
                Bytes::from_static(b"jpg"),
            )
            .await
            .unwrap();
        ctx.record_revisions(
            "s1",
            &DocRef::new(FILES, &file.id),
            &file_chain(&file),
            SharedInfo::new(0, true),
        )
        .await
        .unwrap();

        let mut chain = file_chain(&file);
        chain.push("2-z".into());
        ctx.remove_file(&sharing, &file.id, &chain).await.unwrap();
        let moved = ctx.vfs.get(&file.id).await.unwrap().unwrap();
        assert_eq!(moved.dir_id, NO_LONGER_SHARED_DIR_ID);
        assert!(!moved.trashed);
    }
}
