//! `RocksDB` storage backend.
//!
//! Wraps the `rocksdb` crate behind the [`StorageBackend`] trait. All
//! operations are dispatched to a blocking thread via
//! [`tokio::task::spawn_blocking`] since `RocksDB` is a synchronous C++ library.
//!
//! Values are framed with an expiry header (see `record`); expired records
//! are skipped on read and removed on the next `get` that observes them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rocksdb::{DBWithThreadMode, MultiThreaded, Options};
use tracing::debug;

use crate::record;
use crate::{PhysicalEntry, StorageBackend, StorageError};

type Db = DBWithThreadMode<MultiThreaded>;

/// A storage backend backed by `RocksDB`.
///
/// # Examples
///
/// ```no_run
/// # use secman_storage::RocksDbBackend;
/// let backend = RocksDbBackend::open("/var/lib/secman/data").unwrap();
/// ```
#[derive(Clone)]
pub struct RocksDbBackend {
    db: Arc<Db>,
    path: PathBuf,
}

impl std::fmt::Debug for RocksDbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RocksDbBackend {
    /// Open a `RocksDB` database at the given path, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if `RocksDB` fails to open the database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = Db::open(&opts, path).map_err(|e| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "rocksdb storage opened");

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    /// Return the filesystem path of this database.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl StorageBackend for RocksDbBackend {
    async fn get(&self, path: &str) -> Result<PhysicalEntry, StorageError> {
        let db = Arc::clone(&self.db);
        let path = path.to_owned();
        tokio::task::spawn_blocking(move || {
            let framed = db
                .get(path.as_bytes())
                .map_err(|e| StorageError::Read {
                    path: path.clone(),
                    reason: e.to_string(),
                })?
                .ok_or_else(|| StorageError::NotFound { path: path.clone() })?;

            let (deadline, value) = record::decode(&path, &framed)?;
            if record::is_expired(deadline) {
                // Best effort: an expired record is already invisible.
                let _ = db.delete(path.as_bytes());
                return Err(StorageError::NotFound { path });
            }
            Ok(PhysicalEntry { path, value })
        })
        .await
        .map_err(|e| StorageError::Read {
            path: String::new(),
            reason: format!("blocking task panicked: {e}"),
        })?
    }

    async fn update(
        &self,
        path: &str,
        entry: PhysicalEntry,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let db = Arc::clone(&self.db);
        let path = path.to_owned();
        let framed = record::encode(record::deadline(ttl), &entry.value);
        tokio::task::spawn_blocking(move || {
            db.put(path.as_bytes(), &framed)
                .map_err(|e| StorageError::Write {
                    path,
                    reason: e.to_string(),
                })
        })
        .await
        .map_err(|e| StorageError::Write {
            path: String::new(),
            reason: format!("blocking task panicked: {e}"),
        })?
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let db = Arc::clone(&self.db);
        let path = path.to_owned();
        tokio::task::spawn_blocking(move || {
            db.delete(path.as_bytes()).map_err(|e| StorageError::Delete {
                path,
                reason: e.to_string(),
            })
        })
        .await
        .map_err(|e| StorageError::Delete {
            path: String::new(),
            reason: format!("blocking task panicked: {e}"),
        })?
    }

    async fn list(&self, prefix: &str) -> Result<Vec<PhysicalEntry>, StorageError> {
        let db = Arc::clone(&self.db);
        let prefix = prefix.to_owned();
        tokio::task::spawn_blocking(move || {
            let iter = db.iterator(rocksdb::IteratorMode::From(
                prefix.as_bytes(),
                rocksdb::Direction::Forward,
            ));

            let mut entries = Vec::new();
            for item in iter {
                let (k, v) = item.map_err(|e| StorageError::List {
                    prefix: prefix.clone(),
                    reason: e.to_string(),
                })?;
                let path = String::from_utf8(k.to_vec()).map_err(|e| StorageError::InvalidKey {
                    reason: e.to_string(),
                })?;
                if !path.starts_with(&prefix) {
                    break;
                }
                let (deadline, value) = record::decode(&path, &v)?;
                if !record::is_expired(deadline) {
                    entries.push(PhysicalEntry { path, value });
                }
            }
            Ok(entries)
        })
        .await
        .map_err(|e| StorageError::List {
            prefix: String::new(),
            reason: format!("blocking task panicked: {e}"),
        })?
    }
}
