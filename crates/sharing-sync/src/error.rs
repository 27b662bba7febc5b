//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur during replication and file transfers.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The request or message is malformed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The bearer token was refused, even after a refresh.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The caller is known but not allowed to do this. Answered with 422 so
    /// that the caller does not take it for revoked credentials.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A document, sharing, or upload key does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An incoming document violates the local rules. Accumulated per item.
    #[error("safety violation: {0}")]
    Safety(String),

    /// The peer answered with another client error.
    #[error("remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// The peer failed to handle the request.
    #[error("internal error on peer: {0}")]
    Internal(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Timeout waiting for peer.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The sharing is not active on this instance.
    #[error("sharing {0} is not active")]
    Inactive(String),

    /// Several items failed; every other item was applied.
    #[error("{} errors, first: {}", .0.len(), .0.first().map(|e| e.to_string()).unwrap_or_default())]
    Multi(Vec<SyncError>),

    /// Store operation failed.
    #[error("store error: {0}")]
    StoreError(#[from] sharing_store::StoreError),

    /// Membership or credential error.
    #[error("permission error: {0}")]
    PermsError(#[from] sharing_perms::PermsError),

    /// Document decoding error.
    #[error("core error: {0}")]
    CoreError(#[from] sharing_core::CoreError),

    /// Rule validation failed.
    #[error("validation error: {0}")]
    ValidationError(#[from] sharing_core::ValidationError),
}

impl SyncError {
    /// HTTP status the inbound API answers with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            SyncError::InvalidMessage(_) | SyncError::ValidationError(_) | SyncError::CoreError(_) => 400,
            SyncError::Unauthorized(_) => 401,
            SyncError::Inactive(_) => 403,
            SyncError::Forbidden(_) | SyncError::Safety(_) => 422,
            SyncError::NotFound(_) => 404,
            SyncError::Remote { status, .. } => *status,
            SyncError::StoreError(e) if e.is_not_found() => 404,
            SyncError::StoreError(e) if e.is_conflict() => 409,
            SyncError::PermsError(sharing_perms::PermsError::PermissionDenied(_)) => 403,
            SyncError::Multi(errors) => errors.first().map_or(500, SyncError::status_code),
            _ => 500,
        }
    }

    /// Rebuild an error from a peer's answer.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => SyncError::Unauthorized(message),
            400..=499 => SyncError::Remote { status, message },
            _ => SyncError::Internal(message),
        }
    }

    /// Whether the peer answered with a client error, which warrants a token
    /// refresh before giving up.
    pub fn is_client_error(&self) -> bool {
        matches!(self, SyncError::Unauthorized(_) | SyncError::Remote { .. })
    }

    /// Whether the peer refused our credentials.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            SyncError::Unauthorized(_) => true,
            SyncError::Multi(errors) => errors.iter().any(SyncError::is_unauthorized),
            _ => false,
        }
    }

    /// Fold accumulated errors into a single result.
    pub fn collect(mut errors: Vec<SyncError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(SyncError::Multi(errors)),
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
