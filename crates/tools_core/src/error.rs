//! Error types for the identity core.
//!
//! Errors are split by concern: decoding identifiers, talking to a storage
//! backend, and the manager's own operations. "Not found" is never an error
//! here; lookups return `Option`.

use thiserror::Error;

/// Failure to turn bytes or text into a [`UserId`](crate::UserId).
#[derive(Error, Debug)]
pub enum IdentifierError {
    /// Encoded identifier was not exactly 16 bytes long.
    #[error("Malformed identifier: expected 16 bytes, got {len}")]
    Malformed { len: usize },

    /// Textual identifier could not be parsed.
    #[error("Malformed identifier text: {0}")]
    Parse(#[from] uuid::Error),
}

/// Errors reported by a [`Store`](crate::store::Store) backend.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend could not be reached or opened.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Backend rejected the write.
    #[error("Storage constraint violated: {0}")]
    Constraint(String),

    /// A stored key did not decode to an identifier.
    #[error("Stored identifier is malformed: {0}")]
    MalformedIdentifier(#[from] IdentifierError),

    /// A stored row could not be understood.
    #[error("Corrupt row for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// A row could not be encoded for writing.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        let reason = err.to_string();
        match err {
            sled::Error::Corruption { .. } => StorageError::Corrupt {
                key: "<sled>".to_string(),
                reason,
            },
            _ => StorageError::Unavailable(reason),
        }
    }
}

/// Errors surfaced by the [`UserManager`](crate::UserManager).
#[derive(Error, Debug)]
pub enum ManagerError {
    /// Schema provisioning or the initial load failed; the cache cannot be trusted.
    #[error("Startup aborted: {0}")]
    Startup(#[source] StorageError),

    /// An on-demand store lookup failed.
    #[error("Lookup failed: {0}")]
    Lookup(#[source] StorageError),

    #[error("Unknown flag: {0}")]
    UnknownFlag(String),

    #[error("Manager is shutting down")]
    ShuttingDown,
}
