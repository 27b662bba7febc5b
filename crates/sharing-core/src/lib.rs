//! # Sharing Core
//!
//! Pure primitives for the sharing engine: documents, revision trees,
//! conflict detection, XOR identifiers, and sharing rules.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Document`] - A typed envelope around an open map of fields
//! - [`RevsTree`] - The known lineage of one document
//! - [`Rule`] - Which documents take part in a sharing, and how
//! - [`XorKey`] - Per-member key that keeps file ids distinct across instances

pub mod conflict;
pub mod consts;
pub mod doc;
pub mod error;
pub mod revision;
pub mod rule;
pub mod types;
pub mod validation;
pub mod xor;

pub use conflict::{conflict_id, conflict_name, detect_conflict, ConflictStatus, MAX_CONFLICT_SUFFIX};
pub use doc::Document;
pub use error::{CoreError, ValidationError};
pub use revision::{new_rev, rev_generation, rev_hash, RevsTree, MAX_DEPTH};
pub use rule::{Rule, RuleAction, TriggerArgs, Verb};
pub use types::{DocRef, DocReference};
pub use validation::{validate_description, validate_rules, validate_sharing_request};
pub use xor::{xor_id, XorKey};

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
