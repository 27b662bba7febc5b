//! Error types for the sharing core.

use thiserror::Error;

/// Core errors that can occur while handling documents and revisions.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid revision: {0}")]
    InvalidRevision(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("no free name left for {0}")]
    NameExhausted(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::DecodingError(e.to_string())
    }
}

/// Validation errors for rules and sharing requests.
///
/// These are rejected synchronously when a sharing is created and are never
/// retried.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("a sharing needs at least one rule")]
    NoRules,

    #[error("rule {index} has no doctype")]
    MissingDoctype { index: usize },

    #[error("rule {index} targets the internal doctype {doctype}")]
    ForbiddenDoctype { index: usize, doctype: String },

    #[error("rule {index} has no values")]
    MissingValues { index: usize },

    #[error("rule {index} selects files by id and must have exactly one value, got {count}")]
    TooManyFileValues { index: usize, count: usize },

    #[error("rule {index} has an invalid policy: {reason}")]
    InvalidPolicy { index: usize, reason: String },

    #[error("a sharing needs at least one recipient")]
    NoRecipients,

    #[error("a sharing needs a description")]
    MissingDescription,

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("structural error: {0}")]
    StructuralError(String),
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidRevision(msg)
            | CoreError::InvalidDocument(msg)
            | CoreError::InvalidReference(msg)
            | CoreError::EncodingError(msg)
            | CoreError::DecodingError(msg)
            | CoreError::NameExhausted(msg) => ValidationError::StructuralError(msg),
        }
    }
}
