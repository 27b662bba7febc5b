//! Error types for the permissions module.

use thiserror::Error;

/// Errors that can occur during membership and credential operations.
#[derive(Debug, Error)]
pub enum PermsError {
    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// No member at this index.
    #[error("member not found: {0}")]
    MemberNotFound(usize),

    /// No group at this index, or no such contact group.
    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// No such contact.
    #[error("contact not found: {0}")]
    ContactNotFound(String),

    /// The member cannot be added.
    #[error("invalid member: {0}")]
    InvalidMember(String),

    /// Only the owner may do this.
    #[error("sharing {0} is not owned by this instance")]
    NotOwner(String),

    /// Core error.
    #[error("core error: {0}")]
    CoreError(#[from] sharing_core::CoreError),

    /// Store error.
    #[error("store error: {0}")]
    StoreError(#[from] sharing_store::StoreError),
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
