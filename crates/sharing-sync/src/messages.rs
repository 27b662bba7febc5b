//! Bodies exchanged between instances.
//!
//! Every id crossing the wire is already translated into the receiver's id
//! space. Document keys have the form `doctype/id`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sharing_core::XorKey;
use sharing_perms::{AccessToken, Group, Member, Sharing};

/// Known leaf revisions per document key.
pub type RevsDiffRequest = BTreeMap<String, Vec<String>>;

/// Revisions the receiver lacks, per document key.
pub type RevsDiffResponse = BTreeMap<String, MissingRevs>;

/// Documents to write, grouped by doctype. Each carries `_revisions`.
pub type BulkDocsRequest = BTreeMap<String, Vec<Value>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingRevs {
    pub missing: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub possible_ancestors: Vec<String>,
}

/// Key under which the receiver waits for the content of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadKey {
    pub key: String,
}

/// An invitation, sent by the owner to a recipient's instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharingRequest {
    /// The sharing as the recipient will store it: no credentials and no
    /// triggers.
    pub sharing: Sharing,
    /// Proves the answer comes from the invited member.
    pub state: String,
}

/// A recipient accepting an invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub state: String,
    pub instance: String,
    #[serde(default)]
    pub public_name: String,
    /// Client registered for the owner on the recipient.
    pub client_id: String,
    /// Token the owner must present to the recipient.
    pub access_token: AccessToken,
}

/// The owner completing the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResponse {
    /// Client registered for the recipient on the owner.
    pub client_id: String,
    /// Token the recipient must present to the owner.
    pub access_token: AccessToken,
    pub xor_key: XorKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// The member list, pushed by the owner to every active recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembersUpdate {
    pub members: Vec<Member>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Group>,
}

/// A recipient of an open sharing asking the owner to invite people.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedAdd {
    pub members: Vec<Member>,
}

/// Key of a document on the wire.
pub fn doc_key(doctype: &str, id: &str) -> String {
    format!("{}/{}", doctype, id)
}
