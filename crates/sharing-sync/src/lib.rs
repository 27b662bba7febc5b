//! # Sharing Sync
//!
//! Replication between the members of a sharing.
//!
//! ## Overview
//!
//! Local writes are tracked into shared references (`io.cozy.shared`), one
//! per document, holding the revision tree and the sharings it belongs to.
//! Two workers read the changes feed of those references for each member:
//!
//! - the **replicator** sends documents, directories and removals through
//!   `_revs_diff` then `_bulk_docs`;
//! - the **uploader** sends files, metadata first, content only when the
//!   member asks for it.
//!
//! File ids are translated between the two instances with the XOR key of
//! the pair, so that the same file never has the same id on both sides.
//!
//! ## Message Flow
//!
//! ```text
//! Sender                               Member
//!   |-------- _revs_diff ------------->|
//!   |<------- missing revisions -------|
//!   |-------- _bulk_docs ------------->|
//!   |-------- file metadata ---------->|
//!   |<------- upload key --------------|
//!   |-------- file content ----------->|
//! ```
//!
//! A 4xx answer triggers one token refresh and one retry.

pub mod context;
pub mod error;
pub mod files;
pub mod http;
pub mod lock;
pub mod messages;
pub mod replicator;
pub mod retry;
pub mod seq;
pub mod shared;
pub mod track;
pub mod transport;
pub mod upload;
pub mod upload_store;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{SyncConfig, SyncContext};
pub use error::{Result, SyncError};
pub use http::HttpTransport;
pub use lock::{replicate_lock, upload_lock, LockRegistry, SHARED_LOCK};
pub use messages::{
    doc_key, AnswerRequest, AnswerResponse, BulkDocsRequest, DelegatedAdd, MembersUpdate,
    MissingRevs, RefreshRequest, RevsDiffRequest, RevsDiffResponse, SharingRequest, UploadKey,
};
pub use replicator::RoundReport;
pub use retry::{RetryDescriptor, MAX_RETRIES};
pub use seq::{cursor_id, REPLICATOR, UPLOADER};
pub use shared::{SharedInfo, SharedRef};
pub use track::TrackOutcome;
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, Inbound, RemoteTarget, Transport};
pub use upload_store::{MemoryUploadStore, PendingUpload, UploadStore};
