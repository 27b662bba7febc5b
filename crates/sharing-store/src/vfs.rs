//! In-memory implementation of the Vfs trait.
//!
//! Holds the root and trash directories from the start. Contents are kept
//! as `Bytes` next to the metadata.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use sharing_core::consts::{FILES, ROOT_DIR_ID, ROOT_DIR_PATH, TRASH_DIR_ID, TRASH_DIR_NAME};
use sharing_core::{conflict_name, now_millis, DocReference, Document, Verb};

use crate::error::{Result, StoreError};
use crate::events::{Event, EventBus};
use crate::file::{checksum, FileDoc};
use crate::traits::{next_rev, push_rev, Vfs};

/// In-memory virtual file system.
pub struct MemoryVfs {
    inner: RwLock<VfsInner>,
    events: Option<EventBus>,
}

struct VfsInner {
    files: HashMap<String, FileDoc>,
    contents: HashMap<String, Bytes>,
}

impl VfsInner {
    fn dir(&self, id: &str) -> Result<&FileDoc> {
        match self.files.get(id) {
            Some(doc) if doc.is_dir() => Ok(doc),
            Some(_) => Err(StoreError::InvalidData(format!("{} is not a directory", id))),
            None => Err(StoreError::NotFound(format!("directory {}", id))),
        }
    }

    fn path_of(&self, id: &str) -> Option<String> {
        if id == ROOT_DIR_ID {
            return Some(ROOT_DIR_PATH.to_string());
        }
        let mut names = Vec::new();
        let mut current = self.files.get(id)?;
        loop {
            names.push(current.name.clone());
            if current.dir_id == ROOT_DIR_ID || names.len() > 1024 {
                break;
            }
            current = self.files.get(&current.dir_id)?;
        }
        names.reverse();
        Some(format!("/{}", names.join("/")))
    }

    fn name_taken(&self, dir_id: &str, name: &str, except: &str) -> bool {
        self.files
            .values()
            .any(|f| f.dir_id == dir_id && f.name == name && f.id != except)
    }

    fn is_inside(&self, id: &str, ancestor: &str) -> bool {
        let mut current = id.to_string();
        for _ in 0..1024 {
            if current == ancestor {
                return true;
            }
            match self.files.get(&current) {
                Some(doc) if !doc.dir_id.is_empty() => current = doc.dir_id.clone(),
                _ => return false,
            }
        }
        false
    }

    fn descendants(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(dir) = stack.pop() {
            for child in self.files.values().filter(|f| f.dir_id == dir) {
                out.push(child.id.clone());
                if child.is_dir() {
                    stack.push(child.id.clone());
                }
            }
        }
        out
    }

    fn with_path(&self, mut doc: FileDoc) -> FileDoc {
        doc.path = if doc.is_dir() {
            self.path_of(&doc.id)
        } else {
            None
        };
        doc
    }

    fn check_placement(&self, doc: &FileDoc) -> Result<()> {
        if doc.name.is_empty() || doc.name.contains('/') {
            return Err(StoreError::InvalidData(format!("invalid name {:?}", doc.name)));
        }
        self.dir(&doc.dir_id)?;
        if self.name_taken(&doc.dir_id, &doc.name, &doc.id) {
            return Err(StoreError::AlreadyExists(format!(
                "{} in {}",
                doc.name, doc.dir_id
            )));
        }
        Ok(())
    }

    /// Assign the next revision to a document and store it.
    fn commit(&mut self, mut doc: FileDoc, mut history: Vec<String>) -> Result<FileDoc> {
        doc.path = None;
        doc.rev = None;
        let rev = next_rev(history.last().map(String::as_str), &doc.to_document()?)?;
        push_rev(&mut history, rev.clone());
        doc.rev = Some(rev);
        doc.revisions = history;
        self.files.insert(doc.id.clone(), doc.clone());
        Ok(self.with_path(doc))
    }
}

impl MemoryVfs {
    pub fn new() -> Self {
        let now = now_millis();
        let mut root = FileDoc::new_dir("", "").with_id(ROOT_DIR_ID);
        root.rev = Some("1-root".into());
        root.revisions = vec!["1-root".into()];
        root.created_at = now;
        let mut trash = FileDoc::new_dir(TRASH_DIR_NAME, ROOT_DIR_ID).with_id(TRASH_DIR_ID);
        trash.rev = Some("1-trash".into());
        trash.revisions = vec!["1-trash".into()];

        let mut files = HashMap::new();
        files.insert(root.id.clone(), root);
        files.insert(trash.id.clone(), trash);
        Self {
            inner: RwLock::new(VfsInner {
                files,
                contents: HashMap::new(),
            }),
            events: None,
        }
    }

    /// Publish every write on the given bus.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, VfsInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, VfsInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn emit(&self, verb: Verb, doc: &FileDoc, old: Option<&FileDoc>) -> Result<()> {
        if let Some(events) = &self.events {
            events.emit(Event {
                verb,
                doc: doc.to_document()?,
                old: old.map(FileDoc::to_document).transpose()?,
            });
        }
        Ok(())
    }

    fn emit_doc(&self, verb: Verb, doc: Document, old: Option<Document>) {
        if let Some(events) = &self.events {
            events.emit(Event { verb, doc, old });
        }
    }

    fn create(&self, mut doc: FileDoc, content: Option<Bytes>) -> Result<FileDoc> {
        if doc.id.is_empty() {
            doc.id = Uuid::new_v4().simple().to_string();
        }
        let created = {
            let mut inner = self.write()?;
            if inner.files.contains_key(&doc.id) {
                return Err(StoreError::AlreadyExists(doc.id.clone()));
            }
            inner.check_placement(&doc)?;
            if let Some(content) = &content {
                doc.size = content.len() as u64;
                doc.checksum = Some(checksum(content));
            }
            doc.trashed = false;
            let created = inner.commit(doc, Vec::new())?;
            if let Some(content) = content {
                inner.contents.insert(created.id.clone(), content);
            }
            created
        };
        self.emit(Verb::Created, &created, None)?;
        Ok(created)
    }
}

impl Default for MemoryVfs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Vfs for MemoryVfs {
    async fn get(&self, id: &str) -> Result<Option<FileDoc>> {
        let inner = self.read()?;
        Ok(inner.files.get(id).cloned().map(|d| inner.with_path(d)))
    }

    async fn get_by_path(&self, path: &str) -> Result<Option<FileDoc>> {
        let inner = self.read()?;
        let mut current = ROOT_DIR_ID.to_string();
        for name in path.split('/').filter(|n| !n.is_empty()) {
            match inner
                .files
                .values()
                .find(|f| f.dir_id == current && f.name == name)
            {
                Some(found) => current = found.id.clone(),
                None => return Ok(None),
            }
        }
        Ok(inner.files.get(&current).cloned().map(|d| inner.with_path(d)))
    }

    async fn children(&self, dir_id: &str) -> Result<Vec<FileDoc>> {
        let inner = self.read()?;
        let mut out: Vec<FileDoc> = inner
            .files
            .values()
            .filter(|f| f.dir_id == dir_id && f.id != ROOT_DIR_ID)
            .cloned()
            .map(|d| inner.with_path(d))
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn find_referenced_by(&self, reference: &DocReference) -> Result<Vec<FileDoc>> {
        let inner = self.read()?;
        let mut out: Vec<FileDoc> = inner
            .files
            .values()
            .filter(|f| f.referenced_by.contains(reference))
            .cloned()
            .map(|d| inner.with_path(d))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn create_dir(&self, mut doc: FileDoc) -> Result<FileDoc> {
        doc.kind = crate::file::FileKind::Directory;
        self.create(doc, None)
    }

    async fn create_file(&self, mut doc: FileDoc, content: Bytes) -> Result<FileDoc> {
        doc.kind = crate::file::FileKind::File;
        self.create(doc, Some(content))
    }

    async fn update(&self, doc: FileDoc) -> Result<FileDoc> {
        let (updated, old) = {
            let mut inner = self.write()?;
            let old = inner
                .files
                .get(&doc.id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(doc.id.clone()))?;
            if old.rev != doc.rev {
                return Err(StoreError::Conflict {
                    doctype: FILES.to_string(),
                    id: doc.id.clone(),
                    current: old.rev_str().to_string(),
                });
            }
            if old.kind != doc.kind {
                return Err(StoreError::InvalidData(format!(
                    "{} cannot change its type",
                    doc.id
                )));
            }
            if doc.is_dir() && inner.is_inside(&doc.dir_id, &doc.id) {
                return Err(StoreError::InvalidData(format!(
                    "{} cannot be moved below itself",
                    doc.id
                )));
            }
            inner.check_placement(&doc)?;
            let mut next = doc;
            next.size = old.size;
            next.checksum = old.checksum.clone();
            next.updated_at = now_millis();
            let updated = inner.commit(next, old.revisions.clone())?;
            (updated, old)
        };
        self.emit(Verb::Updated, &updated, Some(&old))?;
        Ok(updated)
    }

    async fn write_content(&self, id: &str, content: Bytes) -> Result<FileDoc> {
        let (updated, old) = {
            let mut inner = self.write()?;
            let old = match inner.files.get(id) {
                Some(doc) if !doc.is_dir() => doc.clone(),
                Some(_) => return Err(StoreError::InvalidData(format!("{} is a directory", id))),
                None => return Err(StoreError::NotFound(id.to_string())),
            };
            let mut next = old.clone();
            next.size = content.len() as u64;
            next.checksum = Some(checksum(&content));
            next.updated_at = now_millis();
            let updated = inner.commit(next, old.revisions.clone())?;
            inner.contents.insert(id.to_string(), content);
            (updated, old)
        };
        self.emit(Verb::Updated, &updated, Some(&old))?;
        Ok(updated)
    }

    async fn trash(&self, id: &str) -> Result<FileDoc> {
        if id == ROOT_DIR_ID || id == TRASH_DIR_ID {
            return Err(StoreError::InvalidData(format!("{} cannot be trashed", id)));
        }
        let (updated, old) = {
            let mut inner = self.write()?;
            let old = inner
                .files
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            let mut next = old.clone();
            next.restore_path = inner.path_of(&old.dir_id);
            next.dir_id = TRASH_DIR_ID.to_string();
            next.trashed = true;
            next.name = conflict_free(&inner, TRASH_DIR_ID, &old.name, !old.is_dir(), id)?;
            next.updated_at = now_millis();
            let updated = inner.commit(next, old.revisions.clone())?;
            (updated, old)
        };
        self.emit(Verb::Updated, &updated, Some(&old))?;
        Ok(updated)
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        if id == ROOT_DIR_ID || id == TRASH_DIR_ID {
            return Err(StoreError::InvalidData(format!("{} cannot be destroyed", id)));
        }
        let tombstones = {
            let mut inner = self.write()?;
            if !inner.files.contains_key(id) {
                return Err(StoreError::NotFound(id.to_string()));
            }
            let mut ids = inner.descendants(id);
            ids.reverse();
            ids.push(id.to_string());

            let mut tombstones = Vec::with_capacity(ids.len());
            for target in ids {
                let Some(old) = inner.files.remove(&target) else {
                    continue;
                };
                inner.contents.remove(&target);
                let mut history = old.revisions.clone();
                let mut tombstone = Document::new(FILES, target.clone());
                tombstone.mark_deleted();
                let rev = next_rev(old.rev.as_deref(), &tombstone)?;
                push_rev(&mut history, rev);
                let tombstone = Document::tombstone(FILES, target, &history);
                tombstones.push((tombstone, old.to_document()?));
            }
            tombstones
        };
        for (tombstone, old) in tombstones {
            self.emit_doc(Verb::Deleted, tombstone, Some(old));
        }
        Ok(())
    }

    async fn open(&self, id: &str) -> Result<Bytes> {
        let inner = self.read()?;
        inner
            .contents
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("content of {}", id)))
    }

    async fn force_put(&self, mut doc: FileDoc, content: Option<Bytes>) -> Result<FileDoc> {
        let Some(rev) = doc.rev.clone() else {
            return Err(StoreError::InvalidData(format!(
                "forced write of {} without revision",
                doc.id
            )));
        };
        let (written, old) = {
            let mut inner = self.write()?;
            let old = inner.files.get(&doc.id).cloned();
            let same_place = old
                .as_ref()
                .is_some_and(|o| o.name == doc.name && o.dir_id == doc.dir_id);
            if content.is_none()
                && same_place
                && old.as_ref().map(|o| o.rev_str()) == Some(rev.as_str())
            {
                let unchanged = old.map(|o| inner.with_path(o));
                return unchanged.ok_or_else(|| StoreError::NotFound(doc.id.clone()));
            }
            if let Some(old) = &old {
                if old.kind != doc.kind {
                    return Err(StoreError::InvalidData(format!(
                        "{} cannot change its type",
                        doc.id
                    )));
                }
            }
            inner.check_placement(&doc)?;
            match (&content, &old) {
                (Some(content), _) => {
                    doc.size = content.len() as u64;
                    doc.checksum = Some(checksum(content));
                }
                (None, Some(old)) if !doc.is_dir() => {
                    doc.size = old.size;
                    doc.checksum = old.checksum.clone();
                }
                (None, None) if !doc.is_dir() => {
                    return Err(StoreError::InvalidData(format!(
                        "new file {} without content",
                        doc.id
                    )));
                }
                _ => {}
            }
            let mut history = if doc.revisions.is_empty() {
                old.as_ref().map(|o| o.revisions.clone()).unwrap_or_default()
            } else {
                std::mem::take(&mut doc.revisions)
            };
            if history.last() != Some(&rev) {
                push_rev(&mut history, rev);
            }
            doc.path = None;
            doc.revisions = history;
            inner.files.insert(doc.id.clone(), doc.clone());
            if let Some(content) = content {
                inner.contents.insert(doc.id.clone(), content);
            }
            (inner.with_path(doc), old)
        };
        let verb = if old.is_some() {
            Verb::Updated
        } else {
            Verb::Created
        };
        self.emit(verb, &written, old.as_ref())?;
        Ok(written)
    }
}

fn conflict_free(
    inner: &VfsInner,
    dir_id: &str,
    name: &str,
    is_file: bool,
    except: &str,
) -> Result<String> {
    if !inner.name_taken(dir_id, name, except) {
        return Ok(name.to_string());
    }
    Ok(conflict_name(name, is_file, |candidate| {
        inner.name_taken(dir_id, candidate, except)
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_root_and_trash_exist() {
        let vfs = MemoryVfs::new();
        let root = vfs.get(ROOT_DIR_ID).await.unwrap().unwrap();
        assert_eq!(root.path.as_deref(), Some("/"));
        let trash = vfs.get_by_path("/.cozy_trash").await.unwrap().unwrap();
        assert_eq!(trash.id, TRASH_DIR_ID);
    }

    #[tokio::test]
    async fn test_create_tree_and_paths() {
        let vfs = MemoryVfs::new();
        let photos = vfs
            .create_dir(FileDoc::new_dir("Photos", ROOT_DIR_ID))
            .await
            .unwrap();
        let trip = vfs
            .create_dir(FileDoc::new_dir("Trip", &photos.id))
            .await
            .unwrap();
        assert_eq!(trip.path.as_deref(), Some("/Photos/Trip"));

        let file = vfs
            .create_file(FileDoc::new_file("a.jpg", &trip.id), Bytes::from_static(b"abc"))
            .await
            .unwrap();
        assert_eq!(file.size, 3);
        assert_eq!(file.checksum.as_deref(), Some(checksum(b"abc").as_str()));
        assert_eq!(vfs.open(&file.id).await.unwrap(), Bytes::from_static(b"abc"));

        let ancestors = vfs.ancestors(&file.id).await.unwrap();
        assert_eq!(ancestors, vec![trip.id.clone(), photos.id.clone(), ROOT_DIR_ID.to_string()]);
        assert_eq!(
            vfs.get_by_path("/Photos/Trip").await.unwrap().unwrap().id,
            trip.id
        );
    }

    #[tokio::test]
    async fn test_names_are_unique_in_a_directory() {
        let vfs = MemoryVfs::new();
        vfs.create_dir(FileDoc::new_dir("Docs", ROOT_DIR_ID))
            .await
            .unwrap();
        let err = vfs
            .create_dir(FileDoc::new_dir("Docs", ROOT_DIR_ID))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_update_bumps_revision_and_checks_it() {
        let vfs = MemoryVfs::new();
        let dir = vfs
            .create_dir(FileDoc::new_dir("Docs", ROOT_DIR_ID))
            .await
            .unwrap();
        let mut renamed = dir.clone();
        renamed.name = "Documents".into();
        let renamed = vfs.update(renamed).await.unwrap();
        assert!(renamed.rev_str().starts_with("2-"));
        assert_eq!(renamed.revisions.len(), 2);

        let mut stale = dir;
        stale.name = "Other".into();
        assert!(vfs.update(stale).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_move_below_itself_is_rejected() {
        let vfs = MemoryVfs::new();
        let a = vfs.create_dir(FileDoc::new_dir("a", ROOT_DIR_ID)).await.unwrap();
        let b = vfs.create_dir(FileDoc::new_dir("b", &a.id)).await.unwrap();
        let mut moved = a.clone();
        moved.dir_id = b.id.clone();
        assert!(vfs.update(moved).await.is_err());
    }

    #[tokio::test]
    async fn test_trash_and_destroy() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let vfs = MemoryVfs::new().with_events(bus);
        let dir = vfs.create_dir(FileDoc::new_dir("d", ROOT_DIR_ID)).await.unwrap();
        let file = vfs
            .create_file(FileDoc::new_file("f.txt", &dir.id), Bytes::from_static(b"x"))
            .await
            .unwrap();

        let trashed = vfs.trash(&dir.id).await.unwrap();
        assert_eq!(trashed.restore_path.as_deref(), Some("/"));
        assert!(vfs.is_trashed(&file.id).await.unwrap());

        vfs.destroy(&dir.id).await.unwrap();
        assert!(vfs.get(&file.id).await.unwrap().is_none());

        let mut deleted = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if event.verb == Verb::Deleted {
                deleted.push(event.doc.id.clone());
            }
        }
        assert_eq!(deleted, vec![file.id, dir.id]);
    }

    #[tokio::test]
    async fn test_force_put_keeps_given_revision() {
        let vfs = MemoryVfs::new();
        let mut dir = FileDoc::new_dir("shared", ROOT_DIR_ID).with_id("d1");
        dir.rev = Some("3-ccc".into());
        dir.revisions = vec!["2-bbb".into(), "3-ccc".into()];
        let written = vfs.force_put(dir.clone(), None).await.unwrap();
        assert_eq!(written.rev_str(), "3-ccc");
        assert_eq!(written.revisions.len(), 2);

        let again = vfs.force_put(dir, None).await.unwrap();
        assert_eq!(again.rev, written.rev);

        let mut file = FileDoc::new_file("f", "d1").with_id("f1");
        file.rev = Some("1-aaa".into());
        assert!(vfs.force_put(file.clone(), None).await.is_err());
        let file = vfs
            .force_put(file, Some(Bytes::from_static(b"hello")))
            .await
            .unwrap();
        assert_eq!(file.size, 5);
    }

    #[tokio::test]
    async fn test_find_referenced_by() {
        let vfs = MemoryVfs::new();
        let album = DocReference::new("io.cozy.photos.albums", "a1");
        vfs.create_file(
            FileDoc::new_file("p.jpg", ROOT_DIR_ID).with_reference(album.clone()),
            Bytes::from_static(b"p"),
        )
        .await
        .unwrap();
        vfs.create_file(FileDoc::new_file("q.jpg", ROOT_DIR_ID), Bytes::from_static(b"q"))
            .await
            .unwrap();
        assert_eq!(vfs.find_referenced_by(&album).await.unwrap().len(), 1);
    }
}
