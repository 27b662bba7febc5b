//! Error types for the engine.

use sharing_core::{CoreError, ValidationError};
use sharing_perms::PermsError;
use sharing_store::StoreError;
use sharing_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid rules or sharing request.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Membership or credentials error.
    #[error("permission error: {0}")]
    Permission(#[from] PermsError),

    /// Sharing not found.
    #[error("sharing not found: {0}")]
    SharingNotFound(String),

    /// Contact or contact group not found.
    #[error("contact not found: {0}")]
    ContactNotFound(String),

    /// The operation does not apply to the sharing in its current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The notifier failed to deliver an invitation.
    #[error("notification failed: {0}")]
    Notify(#[source] anyhow::Error),

    /// A background task panicked or was cancelled.
    #[error("task {0} did not complete")]
    TaskFailed(String),
}

impl EngineError {
    /// The error as the peer protocol reports it.
    pub fn into_sync(self) -> SyncError {
        match self {
            EngineError::Sync(e) => e,
            EngineError::Store(e) => e.into(),
            EngineError::Permission(e) => e.into(),
            EngineError::Validation(e) => e.into(),
            EngineError::Core(e) => e.into(),
            EngineError::SharingNotFound(id) => SyncError::NotFound(format!("sharing {}", id)),
            EngineError::ContactNotFound(id) => SyncError::NotFound(format!("contact {}", id)),
            EngineError::InvalidOperation(msg) => SyncError::Forbidden(msg),
            e => SyncError::Internal(e.to_string()),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
