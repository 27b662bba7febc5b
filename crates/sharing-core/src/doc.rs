//! Documents: a typed envelope plus an open map of fields.
//!
//! Documents coming from the other instance may carry fields this engine
//! knows nothing about. They live in [`Document::fields`] and survive every
//! read/modify/write cycle.

use serde::de::DeserializeOwned;
use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::revision::{rev_generation, rev_hash};
use crate::types::{DocRef, DocReference};

/// A document of any doctype.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Document {
    pub doctype: String,
    pub id: String,
    pub rev: Option<String>,
    /// Every field except `_id` and `_rev`.
    pub fields: Map<String, Value>,
}

impl Document {
    /// Create an empty document.
    pub fn new(doctype: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            doctype: doctype.into(),
            id: id.into(),
            rev: None,
            fields: Map::new(),
        }
    }

    /// Build a document from its JSON form.
    pub fn from_value(doctype: impl Into<String>, value: Value) -> Result<Self, CoreError> {
        let mut fields = match value {
            Value::Object(map) => map,
            other => {
                return Err(CoreError::InvalidDocument(format!(
                    "expected a JSON object, got {}",
                    other
                )))
            }
        };
        let id = match fields.remove("_id") {
            Some(Value::String(id)) => id,
            Some(other) => {
                return Err(CoreError::InvalidDocument(format!("invalid _id: {}", other)))
            }
            None => String::new(),
        };
        let rev = match fields.remove("_rev") {
            Some(Value::String(rev)) => Some(rev),
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(CoreError::InvalidDocument(format!("invalid _rev: {}", other)))
            }
        };
        Ok(Self {
            doctype: doctype.into(),
            id,
            rev,
            fields,
        })
    }

    /// The JSON form, with `_id` and `_rev` merged back in.
    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len() + 2);
        map.insert("_id".into(), Value::String(self.id.clone()));
        if let Some(rev) = &self.rev {
            map.insert("_rev".into(), Value::String(rev.clone()));
        }
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }

    /// Encode a typed value as a document.
    pub fn from_typed<T: serde::Serialize>(
        doctype: impl Into<String>,
        value: &T,
    ) -> Result<Self, CoreError> {
        let value =
            serde_json::to_value(value).map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Self::from_value(doctype, value)
    }

    /// Decode the document into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CoreError> {
        Ok(serde_json::from_value(self.to_value())?)
    }

    /// A deletion marker carrying the full revision chain of the document.
    pub fn tombstone(doctype: impl Into<String>, id: impl Into<String>, chain: &[String]) -> Self {
        let mut doc = Self::new(doctype, id);
        doc.rev = chain.last().cloned();
        doc.mark_deleted();
        doc.set_revisions(chain);
        doc
    }

    pub fn doc_ref(&self) -> DocRef {
        DocRef::new(self.doctype.clone(), self.id.clone())
    }

    /// Current revision, or the empty string for a document never saved.
    pub fn rev_str(&self) -> &str {
        self.rev.as_deref().unwrap_or("")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Look up a dotted path such as `metadata.album.id`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut keys = path.split('.');
        let mut current = self.fields.get(keys.next()?)?;
        for key in keys {
            current = current.as_object()?.get(key)?;
        }
        Some(current)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.fields.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn is_deleted(&self) -> bool {
        self.get_bool("_deleted")
    }

    pub fn mark_deleted(&mut self) {
        self.set("_deleted", true);
    }

    /// Revision chain from `_revisions`, oldest first.
    pub fn revisions(&self) -> Option<Vec<String>> {
        let revs = self.fields.get("_revisions")?.as_object()?;
        let start = revs.get("start")?.as_u64()?;
        let ids = revs.get("ids")?.as_array()?;
        let mut chain = Vec::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate().rev() {
            let generation = start.checked_sub(i as u64)?;
            chain.push(format!("{}-{}", generation, id.as_str()?));
        }
        Some(chain)
    }

    /// Store a chain (oldest first) in the `_revisions` wire format.
    pub fn set_revisions(&mut self, chain: &[String]) {
        let Some(last) = chain.last() else {
            self.fields.remove("_revisions");
            return;
        };
        let ids: Vec<Value> = chain
            .iter()
            .rev()
            .map(|rev| Value::String(rev_hash(rev).to_string()))
            .collect();
        let mut revs = Map::new();
        revs.insert("start".into(), Value::from(rev_generation(last)));
        revs.insert("ids".into(), Value::Array(ids));
        self.fields.insert("_revisions".into(), Value::Object(revs));
    }

    /// Entries of the `referenced_by` field. Malformed entries are skipped.
    pub fn references(&self) -> Vec<DocReference> {
        match self.fields.get("referenced_by") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn set_references(&mut self, refs: &[DocReference]) {
        if refs.is_empty() {
            self.fields.remove("referenced_by");
        } else {
            let items = refs
                .iter()
                .map(|r| serde_json::to_value(r).unwrap_or(Value::Null))
                .collect();
            self.fields.insert("referenced_by".into(), Value::Array(items));
        }
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_survive() {
        let value = json!({
            "_id": "doc1",
            "_rev": "2-abc",
            "title": "hello",
            "x-custom": {"nested": [1, 2, 3]}
        });
        let doc = Document::from_value("io.cozy.notes", value.clone()).unwrap();
        assert_eq!(doc.id, "doc1");
        assert_eq!(doc.rev.as_deref(), Some("2-abc"));
        assert_eq!(doc.to_value(), value);
    }

    #[test]
    fn test_not_an_object() {
        assert!(Document::from_value("io.cozy.notes", json!([1, 2])).is_err());
    }

    #[test]
    fn test_get_path() {
        let doc = Document::from_value(
            "io.cozy.notes",
            json!({"_id": "d", "metadata": {"album": {"id": "a1"}}}),
        )
        .unwrap();
        assert_eq!(doc.get_path("metadata.album.id"), Some(&json!("a1")));
        assert_eq!(doc.get_path("metadata.missing"), None);
        assert_eq!(doc.get_path("metadata.album.id.deeper"), None);
    }

    #[test]
    fn test_revisions_wire_format() {
        let mut doc = Document::new("io.cozy.notes", "d");
        let chain = vec!["1-aaa".to_string(), "2-bbb".to_string(), "3-ccc".to_string()];
        doc.set_revisions(&chain);
        assert_eq!(
            doc.get("_revisions"),
            Some(&json!({"start": 3, "ids": ["ccc", "bbb", "aaa"]}))
        );
        assert_eq!(doc.revisions(), Some(chain));
    }

    #[test]
    fn test_tombstone() {
        let chain = vec!["1-aaa".to_string(), "2-bbb".to_string()];
        let doc = Document::tombstone("io.cozy.notes", "d", &chain);
        assert!(doc.is_deleted());
        assert_eq!(doc.rev.as_deref(), Some("2-bbb"));
        assert_eq!(doc.revisions(), Some(chain));
    }

    #[test]
    fn test_references() {
        let mut doc = Document::from_value(
            "io.cozy.files",
            json!({"_id": "f", "referenced_by": [
                {"type": "io.cozy.photos.albums", "id": "a1"},
                "garbage"
            ]}),
        )
        .unwrap();
        let refs = doc.references();
        assert_eq!(refs, vec![DocReference::new("io.cozy.photos.albums", "a1")]);

        doc.set_references(&[]);
        assert!(doc.get("referenced_by").is_none());
    }

    #[test]
    fn test_typed_roundtrip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Note {
            #[serde(rename = "_id")]
            id: String,
            title: String,
        }
        let note = Note {
            id: "n1".into(),
            title: "t".into(),
        };
        let doc = Document::from_typed("io.cozy.notes", &note).unwrap();
        assert_eq!(doc.id, "n1");
        let back: Note = doc.decode().unwrap();
        assert_eq!(back, note);
    }
}
