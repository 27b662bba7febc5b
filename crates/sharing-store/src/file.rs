//! File and directory documents.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use sharing_core::consts::FILES;
use sharing_core::{Document, DocReference};

use crate::error::Result;

/// Whether a file document is a directory or a regular file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Directory,
    File,
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// Metadata of a file or directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileDoc {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dir_id: String,
    /// Absolute path, filled for directories on read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size: u64,
    /// blake3 hex digest of the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub executable: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub trashed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_path: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_by: Vec<DocReference>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Known revisions, oldest first, the current one last.
    #[serde(skip)]
    pub revisions: Vec<String>,
}

impl FileDoc {
    fn new(kind: FileKind, name: impl Into<String>, dir_id: impl Into<String>) -> Self {
        let now = sharing_core::now_millis();
        Self {
            id: String::new(),
            rev: None,
            kind,
            name: name.into(),
            dir_id: dir_id.into(),
            path: None,
            size: 0,
            checksum: None,
            mime: None,
            class: None,
            executable: false,
            trashed: false,
            restore_path: None,
            created_at: now,
            updated_at: now,
            tags: Vec::new(),
            referenced_by: Vec::new(),
            metadata: Map::new(),
            revisions: Vec::new(),
        }
    }

    pub fn new_dir(name: impl Into<String>, dir_id: impl Into<String>) -> Self {
        Self::new(FileKind::Directory, name, dir_id)
    }

    pub fn new_file(name: impl Into<String>, dir_id: impl Into<String>) -> Self {
        Self::new(FileKind::File, name, dir_id)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn with_reference(mut self, reference: DocReference) -> Self {
        self.referenced_by.push(reference);
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn rev_str(&self) -> &str {
        self.rev.as_deref().unwrap_or("")
    }

    /// The document form, without history.
    pub fn to_document(&self) -> Result<Document> {
        Ok(Document::from_typed(FILES, self)?)
    }

    /// The document form, with the `_revisions` chain when known.
    pub fn to_document_with_revisions(&self) -> Result<Document> {
        let mut doc = self.to_document()?;
        if !self.revisions.is_empty() {
            doc.set_revisions(&self.revisions);
        }
        Ok(doc)
    }

    /// Decode a document, taking its history from `_revisions`.
    pub fn from_document(doc: &Document) -> Result<Self> {
        let mut file: FileDoc = doc.decode()?;
        file.revisions = doc.revisions().unwrap_or_default();
        Ok(file)
    }
}

/// Hex blake3 digest of file content.
pub fn checksum(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_round_trip_keeps_history() {
        let mut file = FileDoc::new_file("a.txt", "dir1").with_id("f1");
        file.rev = Some("2-bbb".into());
        file.revisions = vec!["1-aaa".into(), "2-bbb".into()];
        file.size = 3;

        let doc = file.to_document_with_revisions().unwrap();
        assert_eq!(doc.get_str("type"), Some("file"));
        assert_eq!(doc.revisions().unwrap(), file.revisions);

        let back = FileDoc::from_document(&doc).unwrap();
        assert_eq!(back, file);
    }

    #[test]
    fn test_unset_fields_are_omitted() {
        let dir = FileDoc::new_dir("photos", "root").with_id("d1");
        let doc = dir.to_document().unwrap();
        assert!(doc.get("checksum").is_none());
        assert!(doc.get("trashed").is_none());
        assert_eq!(doc.get_str("type"), Some("directory"));
    }
}
