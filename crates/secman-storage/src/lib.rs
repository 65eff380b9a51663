//! Physical storage for `secman`.
//!
//! This crate defines the [`StorageBackend`] trait, the narrow interface the
//! barrier in `secman-core` uses to persist ciphertext. Backends know nothing
//! about secrets, keys, or engines: paths are opaque `/`-separated strings
//! and values are opaque bytes that the barrier has already encrypted.
//!
//! Two implementations are provided:
//!
//! - [`RocksDbBackend`]: persistent, backed by `RocksDB` (feature `rocksdb-backend`)
//! - [`MemoryBackend`]: in-memory, for tests and development

mod error;
mod memory;
mod record;
#[cfg(feature = "rocksdb-backend")]
mod rocksdb_backend;

use std::time::Duration;

pub use error::StorageError;
pub use memory::MemoryBackend;
#[cfg(feature = "rocksdb-backend")]
pub use rocksdb_backend::RocksDbBackend;

/// A value as it is persisted: ciphertext addressed by its physical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalEntry {
    /// Physical path of the entry (e.g. `secrets/kv/db-password`).
    pub path: String,
    /// Opaque value bytes. Always ciphertext for data written by the barrier.
    pub value: Vec<u8>,
}

impl PhysicalEntry {
    /// Build an entry for `path` holding `value`.
    #[must_use]
    pub fn new(path: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }
}

/// A pluggable key-value storage backend.
///
/// Implementations must be safe to share across async tasks. Dropping a
/// returned future abandons the call; backends must not leave partial writes
/// visible when that happens.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Fetch the entry stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if nothing (or only an expired
    /// entry) is stored at `path`, and [`StorageError::Read`] if the backend
    /// fails.
    async fn get(&self, path: &str) -> Result<PhysicalEntry, StorageError>;

    /// Store `entry` at `path`, overwriting any previous value.
    ///
    /// A `ttl` of `Some(d)` with a non-zero `d` makes the entry expire at
    /// `now + d`; `None` or a zero duration stores it forever.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the backend fails.
    async fn update(
        &self,
        path: &str,
        entry: PhysicalEntry,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError>;

    /// Delete the entry at `path`. Deleting a missing path is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the backend fails.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// List every live entry whose path starts with `prefix`, ordered by path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<PhysicalEntry>, StorageError>;
}
