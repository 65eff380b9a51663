//! Per-engine view over the barrier.
//!
//! Every path is joined onto a fixed prefix before it reaches the barrier, so
//! engines sharing one barrier never see each other's entries.

use std::sync::Arc;
use std::time::Duration;

use crate::barrier::{BarrierStorage, Entry};
use crate::error::BarrierError;

/// A prefixed namespace over a [`BarrierStorage`].
#[derive(Clone)]
pub struct LogicalStorage {
    barrier: Arc<dyn BarrierStorage>,
    prefix: String,
}

impl LogicalStorage {
    /// Create a view rooted at `prefix`. Leading and trailing slashes are
    /// ignored, so `/secrets/kv/` and `secrets/kv` are the same namespace.
    pub fn new(barrier: Arc<dyn BarrierStorage>, prefix: &str) -> Self {
        Self {
            barrier,
            prefix: prefix.trim_matches('/').to_owned(),
        }
    }

    /// The namespace prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Join `path` onto the prefix. Empty and `.` segments are dropped and a
    /// trailing slash is kept, so `list("data/")` stays a directory listing.
    fn relative_path(&self, path: &str) -> Result<String, BarrierError> {
        let mut joined = self.prefix.clone();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    return Err(BarrierError::InvalidPath {
                        path: path.to_owned(),
                        reason: "'..' segments are not allowed".to_owned(),
                    });
                }
                segment => {
                    if !joined.is_empty() {
                        joined.push('/');
                    }
                    joined.push_str(segment);
                }
            }
        }
        if path.ends_with('/') && !joined.is_empty() {
            joined.push('/');
        }
        Ok(joined)
    }

    /// Rewrite an entry's key relative to this namespace.
    fn localize(&self, mut entry: Entry) -> Entry {
        entry.key = entry
            .path
            .strip_prefix(self.prefix.as_str())
            .unwrap_or(&entry.path)
            .trim_start_matches('/')
            .to_owned();
        entry
    }
}

#[async_trait::async_trait]
impl BarrierStorage for LogicalStorage {
    async fn get(&self, path: &str) -> Result<Entry, BarrierError> {
        let entry = self.barrier.get(&self.relative_path(path)?).await?;
        Ok(self.localize(entry))
    }

    async fn update(
        &self,
        path: &str,
        entry: Entry,
        ttl: Option<Duration>,
    ) -> Result<(), BarrierError> {
        self.barrier
            .update(&self.relative_path(path)?, entry, ttl)
            .await
    }

    async fn delete(&self, path: &str) -> Result<(), BarrierError> {
        self.barrier.delete(&self.relative_path(path)?).await
    }

    async fn list(&self, path: &str) -> Result<Vec<Entry>, BarrierError> {
        let entries = self.barrier.list(&self.relative_path(path)?).await?;
        Ok(entries.into_iter().map(|e| self.localize(e)).collect())
    }
}

impl std::fmt::Debug for LogicalStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalStorage")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use tokio::sync::Mutex;

    use super::*;

    /// Plaintext in-memory stand-in for the barrier.
    #[derive(Default)]
    struct PlainStore {
        entries: Mutex<BTreeMap<String, String>>,
    }

    #[async_trait::async_trait]
    impl BarrierStorage for PlainStore {
        async fn get(&self, path: &str) -> Result<Entry, BarrierError> {
            let entries = self.entries.lock().await;
            let value = entries.get(path).ok_or_else(|| BarrierError::NotFound {
                path: path.to_owned(),
            })?;
            Ok(Entry {
                key: path.to_owned(),
                path: path.to_owned(),
                value: value.clone(),
            })
        }

        async fn update(
            &self,
            path: &str,
            entry: Entry,
            _ttl: Option<Duration>,
        ) -> Result<(), BarrierError> {
            self.entries
                .lock()
                .await
                .insert(path.to_owned(), entry.value);
            Ok(())
        }

        async fn delete(&self, path: &str) -> Result<(), BarrierError> {
            self.entries.lock().await.remove(path);
            Ok(())
        }

        async fn list(&self, path: &str) -> Result<Vec<Entry>, BarrierError> {
            let entries = self.entries.lock().await;
            Ok(entries
                .iter()
                .filter(|(p, _)| p.starts_with(path))
                .map(|(p, v)| Entry {
                    key: p.clone(),
                    path: p.clone(),
                    value: v.clone(),
                })
                .collect())
        }
    }

    fn view(prefix: &str) -> (Arc<PlainStore>, LogicalStorage) {
        let store = Arc::new(PlainStore::default());
        let view = LogicalStorage::new(store.clone(), prefix);
        (store, view)
    }

    #[test]
    fn joins_and_cleans_paths() {
        let (_, view) = view("/secrets/kv/");
        assert_eq!(view.prefix(), "secrets/kv");
        assert_eq!(view.relative_path("a").unwrap(), "secrets/kv/a");
        assert_eq!(view.relative_path("/a//b/./c").unwrap(), "secrets/kv/a/b/c");
        assert_eq!(view.relative_path("data/").unwrap(), "secrets/kv/data/");
        assert_eq!(view.relative_path("").unwrap(), "secrets/kv");
    }

    #[test]
    fn parent_segments_are_rejected() {
        let (_, view) = view("secrets/kv");
        assert!(matches!(
            view.relative_path("../../sys/keyring/1").unwrap_err(),
            BarrierError::InvalidPath { .. }
        ));
    }

    #[tokio::test]
    async fn writes_land_under_prefix() {
        let (store, view) = view("secrets/kv");
        view.update("a", Entry::new("x"), None).await.unwrap();

        assert!(store.entries.lock().await.contains_key("secrets/kv/a"));

        let entry = view.get("a").await.unwrap();
        assert_eq!(entry.key, "a");
        assert_eq!(entry.path, "secrets/kv/a");
        assert_eq!(entry.value, "x");
    }

    #[tokio::test]
    async fn get_ok_translates_not_found() {
        let (_, view) = view("secrets/kv");
        assert!(view.get_ok("missing").await.unwrap().is_none());
        view.update("present", Entry::new("1"), None).await.unwrap();
        assert_eq!(view.get_ok("present").await.unwrap().unwrap().key, "present");
    }

    #[tokio::test]
    async fn namespaces_do_not_overlap() {
        let store = Arc::new(PlainStore::default());
        let kv = LogicalStorage::new(store.clone(), "secrets/kv");
        let blobs = LogicalStorage::new(store, "secrets/blobs");

        kv.update("shared", Entry::new("kv"), None).await.unwrap();
        blobs.update("shared", Entry::new("blobs"), None).await.unwrap();

        assert_eq!(kv.get("shared").await.unwrap().value, "kv");
        assert_eq!(blobs.get("shared").await.unwrap().value, "blobs");
    }

    #[tokio::test]
    async fn list_strips_prefix_from_keys() {
        let (_, view) = view("secrets/kv");
        view.update("data/a", Entry::new("1"), None).await.unwrap();
        view.update("data/b", Entry::new("2"), None).await.unwrap();
        view.update("enabled", Entry::new("true"), None).await.unwrap();

        let keys: Vec<_> = view
            .list("data/")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["data/a", "data/b"]);
    }

    #[tokio::test]
    async fn delete_forwards() {
        let (store, view) = view("secrets/kv");
        view.update("a", Entry::new("x"), None).await.unwrap();
        view.delete("a").await.unwrap();
        assert!(store.entries.lock().await.is_empty());
    }
}
