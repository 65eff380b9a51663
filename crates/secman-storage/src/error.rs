//! Storage error types.
//!
//! Every variant carries the path or prefix it concerns so a failure can be
//! diagnosed from the log line alone.

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Nothing is stored at the path, or the stored entry has expired.
    #[error("entry not found at '{path}'")]
    NotFound { path: String },

    /// Failed to open the storage backend at the given location.
    #[error("failed to open storage at '{path}': {reason}")]
    Open { path: String, reason: String },

    /// Failed to read a value from storage.
    #[error("failed to read '{path}': {reason}")]
    Read { path: String, reason: String },

    /// Failed to write a value to storage.
    #[error("failed to write '{path}': {reason}")]
    Write { path: String, reason: String },

    /// Failed to delete a value from storage.
    #[error("failed to delete '{path}': {reason}")]
    Delete { path: String, reason: String },

    /// Failed to list values under the given prefix.
    #[error("failed to list prefix '{prefix}': {reason}")]
    List { prefix: String, reason: String },

    /// A stored path contained invalid UTF-8.
    #[error("invalid path encoding: {reason}")]
    InvalidKey { reason: String },

    /// A stored record could not be decoded (truncated expiry header).
    #[error("corrupted record at '{path}': {reason}")]
    Corrupted { path: String, reason: String },
}

impl StorageError {
    /// Whether this is the [`StorageError::NotFound`] sentinel.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
