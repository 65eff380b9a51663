//! Engine registry: mount points and lifecycle fan-out.
//!
//! Engines are keyed by their normalized root path. Resolution walks from
//! the full request path towards `/` one segment at a time, so the longest
//! registered prefix wins and `/secrets/kvx` never matches `/secrets/kv`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::dispatcher::RequestDispatcher;
use crate::engine::Engine;
use crate::error::{EngineError, RouterError};

/// A registered engine with its compiled route table.
#[derive(Clone)]
pub struct Mount {
    pub engine: Arc<dyn Engine>,
    pub dispatcher: Arc<RequestDispatcher>,
}

impl std::fmt::Debug for Mount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mount")
            .field("root_path", &self.engine.root_path())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

/// Maps root paths to engines.
///
/// Registration takes the write lock; resolution and the post-unseal fan-out
/// take the read lock and may run concurrently.
#[derive(Default)]
pub struct EngineRegistry {
    mounts: RwLock<BTreeMap<String, Mount>>,
}

impl EngineRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine at its root path and compile its route table.
    ///
    /// # Errors
    ///
    /// - [`RouterError::EngineAlreadyRegistered`] if an engine already owns
    ///   exactly this root path.
    /// - [`RouterError::InvalidPath`] for an empty root path or a bad route
    ///   pattern.
    pub async fn register(&self, engine: Arc<dyn Engine>) -> Result<(), RouterError> {
        let root = normalize_root(engine.root_path())?;
        let dispatcher = Arc::new(RequestDispatcher::new(engine.paths())?);

        let mut mounts = self.mounts.write().await;
        if mounts.contains_key(&root) {
            return Err(RouterError::EngineAlreadyRegistered { path: root });
        }
        info!(path = %root, routes = dispatcher.routes().count(), "engine registered");
        mounts.insert(root, Mount { engine, dispatcher });
        Ok(())
    }

    /// Find the engine owning `path` by longest segment-aligned prefix.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::EngineNotFound`] if no registered root path is
    /// a prefix of `path`.
    pub async fn resolve(&self, path: &str) -> Result<Mount, RouterError> {
        let mounts = self.mounts.read().await;
        let normalized = format!("/{}", path.trim_matches('/'));

        let mut candidate = normalized.as_str();
        loop {
            if let Some(mount) = mounts.get(candidate) {
                return Ok(mount.clone());
            }
            match candidate.rfind('/') {
                Some(0) | None => break,
                Some(i) => candidate = &candidate[..i],
            }
        }
        Err(RouterError::EngineNotFound {
            path: path.to_owned(),
        })
    }

    /// Run every engine's `post_unseal` hook. Engines reporting
    /// [`EngineError::NotEnabled`] are skipped.
    ///
    /// # Errors
    ///
    /// The first other error aborts the fan-out and is returned.
    pub async fn post_unseal_engines(&self) -> Result<(), EngineError> {
        let mounts = self.mounts.read().await;
        for (path, mount) in mounts.iter() {
            match mount.engine.post_unseal().await {
                Ok(()) => info!(path = %path, "engine restored after unseal"),
                Err(e) if e.is_not_enabled() => debug!(path = %path, "engine not enabled, skipped"),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Registered root paths, sorted.
    pub async fn root_paths(&self) -> Vec<String> {
        self.mounts.read().await.keys().cloned().collect()
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry").finish_non_exhaustive()
    }
}

fn normalize_root(path: &str) -> Result<String, RouterError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(RouterError::InvalidPath {
            path: path.to_owned(),
            reason: "engine root path must not be empty".to_owned(),
        });
    }
    Ok(format!("/{trimmed}"))
}
