//! Identifier types for the sharing engine.
//!
//! Documents are addressed by `(doctype, id)`. Shared references use the
//! `doctype/id` string form as their own identifier.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// The address of a document: its doctype and identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocRef {
    pub doctype: String,
    pub id: String,
}

impl DocRef {
    /// Create a new reference.
    pub fn new(doctype: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            doctype: doctype.into(),
            id: id.into(),
        }
    }

    /// The `doctype/id` key used by shared references and revs-diff maps.
    pub fn key(&self) -> String {
        format!("{}/{}", self.doctype, self.id)
    }
}

impl fmt::Debug for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocRef({}/{})", self.doctype, self.id)
    }
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.doctype, self.id)
    }
}

impl FromStr for DocRef {
    type Err = CoreError;

    /// Parse a `doctype/id` key. The id may itself contain slashes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((doctype, id)) if !doctype.is_empty() && !id.is_empty() => {
                Ok(Self::new(doctype, id))
            }
            _ => Err(CoreError::InvalidReference(s.to_string())),
        }
    }
}

/// An entry of the `referenced_by` list of a file: the document that
/// references it, for example a photo album.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocReference {
    #[serde(rename = "type")]
    pub doctype: String,
    pub id: String,
}

impl DocReference {
    pub fn new(doctype: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            doctype: doctype.into(),
            id: id.into(),
        }
    }

    /// The `type/id` form rule values use.
    pub fn key(&self) -> String {
        format!("{}/{}", self.doctype, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_ref_key_roundtrip() {
        let r = DocRef::new("io.cozy.files", "abc-123");
        let parsed: DocRef = r.key().parse().unwrap();
        assert_eq!(parsed, r);
    }

    #[test]
    fn test_doc_ref_id_with_slash() {
        let parsed: DocRef = "io.cozy.sharings.cursors/sharing-1-2/upload".parse().unwrap();
        assert_eq!(parsed.doctype, "io.cozy.sharings.cursors");
        assert_eq!(parsed.id, "sharing-1-2/upload");
    }

    #[test]
    fn test_doc_ref_invalid() {
        assert!("nodoctype".parse::<DocRef>().is_err());
        assert!("/id".parse::<DocRef>().is_err());
    }

    #[test]
    fn test_doc_reference_serde() {
        let r = DocReference::new("io.cozy.photos.albums", "a1");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["type"], "io.cozy.photos.albums");
        assert_eq!(r.key(), "io.cozy.photos.albums/a1");
    }
}
