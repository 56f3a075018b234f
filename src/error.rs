// src/error.rs
//! Typed errors for the places where callers branch on the failure kind.
//! Everything else (adapter fetches, bootstrap) goes through `anyhow`.

use thiserror::Error;

/// Errors surfaced by the storage collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Insert collided with the unique (source_id, external_id) key.
    #[error("unique constraint violated for source {source_id} / external id {external_id}")]
    UniqueViolation { source_id: i64, external_id: String },
    /// The backing store does not implement the requested capability.
    #[error("store capability not supported: {0}")]
    Unsupported(&'static str),
    #[error("record not found: {0}")]
    NotFound(String),
    /// Race recovery could not find the row that won the insert.
    #[error("conflict could not be resolved: {0}")]
    Conflict(String),
}

/// A raw provider item that cannot be mapped to the canonical article shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("raw item is not a JSON object")]
    NotAnObject,
    #[error("field `{field}` has an unexpected type")]
    InvalidField { field: &'static str },
    #[error("unparsable published_at value: {0}")]
    InvalidTimestamp(String),
}

/// Why a single fetched item could not be stored. The cycle carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure while handling an inbound message.
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("message is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("message envelope must carry integer version, string type and object data")]
    InvalidEnvelope,
    #[error("source {0} referenced by message does not exist")]
    UnknownSource(i64),
    #[error("missing field `{0}` in message data")]
    MissingField(&'static str),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ItemError> for MessageError {
    fn from(e: ItemError) -> Self {
        match e {
            ItemError::Normalize(n) => MessageError::Normalize(n),
            ItemError::Store(s) => MessageError::Store(s),
        }
    }
}
