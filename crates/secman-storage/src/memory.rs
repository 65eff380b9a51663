//! In-memory storage backend.
//!
//! Stores everything in a `BTreeMap` behind a `RwLock`. Nothing is persisted;
//! use it for tests and for running the server without a data directory.
//! Expired entries are hidden from reads and reaped lazily on the next write.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::record;
use crate::{PhysicalEntry, StorageBackend, StorageError};

#[derive(Debug, Clone)]
struct Slot {
    value: Vec<u8>,
    deadline: Option<i64>,
}

/// An in-memory storage backend backed by a `BTreeMap`.
///
/// Clones share the same underlying map. Paths are kept sorted, which makes
/// prefix listing a range scan.
///
/// # Examples
///
/// ```
/// # use secman_storage::{MemoryBackend, PhysicalEntry, StorageBackend};
/// # #[tokio::main]
/// # async fn main() {
/// let backend = MemoryBackend::new();
/// backend
///     .update("sys/config", PhysicalEntry::new("sys/config", b"data".to_vec()), None)
///     .await
///     .unwrap();
/// let entry = backend.get("sys/config").await.unwrap();
/// assert_eq!(entry.value, b"data");
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<String, Slot>>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<PhysicalEntry, StorageError> {
        let data = self.data.read().await;
        match data.get(path) {
            Some(slot) if !record::is_expired(slot.deadline) => {
                Ok(PhysicalEntry::new(path, slot.value.clone()))
            }
            _ => Err(StorageError::NotFound {
                path: path.to_owned(),
            }),
        }
    }

    async fn update(
        &self,
        path: &str,
        entry: PhysicalEntry,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        data.retain(|_, slot| !record::is_expired(slot.deadline));
        data.insert(
            path.to_owned(),
            Slot {
                value: entry.value,
                deadline: record::deadline(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.data.write().await.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<PhysicalEntry>, StorageError> {
        let data = self.data.read().await;
        let entries = data
            .range(prefix.to_owned()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .filter(|(_, slot)| !record::is_expired(slot.deadline))
            .map(|(path, slot)| PhysicalEntry::new(path.clone(), slot.value.clone()))
            .collect();
        Ok(entries)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn put(backend: &MemoryBackend, path: &str, value: &[u8]) {
        backend
            .update(path, PhysicalEntry::new(path, value.to_vec()), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.get("does/not/exist").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn update_overwrites_existing() {
        let backend = MemoryBackend::new();
        put(&backend, "key", b"v1").await;
        put(&backend, "key", b"v2").await;
        assert_eq!(backend.get("key").await.unwrap().value, b"v2");
    }

    #[tokio::test]
    async fn delete_missing_is_noop() {
        let backend = MemoryBackend::new();
        backend.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn list_returns_entries_under_prefix_in_order() {
        let backend = MemoryBackend::new();
        put(&backend, "kv/b", b"2").await;
        put(&backend, "kv/a", b"1").await;
        put(&backend, "sys/config", b"3").await;

        let entries = backend.list("kv/").await.unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["kv/a", "kv/b"]);
        assert_eq!(entries[0].value, b"1");
    }

    #[tokio::test]
    async fn expired_entry_behaves_like_missing() {
        let backend = MemoryBackend::new();
        backend
            .update(
                "lease",
                PhysicalEntry::new("lease", b"x".to_vec()),
                Some(Duration::from_millis(20)),
            )
            .await
            .unwrap();
        assert!(backend.get("lease").await.is_ok());

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(backend.get("lease").await.unwrap_err().is_not_found());
        assert!(backend.list("lease").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_ttl_never_expires() {
        let backend = MemoryBackend::new();
        backend
            .update("a", PhysicalEntry::new("a", b"x".to_vec()), Some(Duration::ZERO))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(backend.get("a").await.unwrap().value, b"x");
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();
        put(&backend, "key", b"val").await;
        assert_eq!(clone.get("key").await.unwrap().value, b"val");
    }
}
