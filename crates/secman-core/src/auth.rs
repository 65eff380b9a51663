//! Authorization chain.
//!
//! Requests without a root token are offered to every enabled auth engine in
//! the order they were enabled. The list of enabled root paths is persisted
//! behind the barrier at `sys/auth` and rebuilt after every unseal.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::barrier::{BarrierStorage, Entry};
use crate::engine::{Engine, LogicalRequest};
use crate::error::AuthError;
use crate::registry::EngineRegistry;

/// Barrier path of the persisted chain.
pub const AUTH_CHAIN_PATH: &str = "sys/auth";

/// Ordered list of engines able to authorize requests.
pub struct AuthChain {
    storage: Arc<dyn BarrierStorage>,
    chain: RwLock<Vec<Arc<dyn Engine>>>,
}

impl AuthChain {
    pub fn new(storage: Arc<dyn BarrierStorage>) -> Self {
        Self {
            storage,
            chain: RwLock::new(Vec::new()),
        }
    }

    /// Append `engine` to the chain and persist its root path. Enabling an
    /// engine already in the chain is a no-op.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotAuthorizer`] if the engine cannot authorize; nothing
    ///   is persisted in that case.
    /// - [`AuthError::Barrier`] if the chain cannot be read or written.
    pub async fn enable_engine(&self, engine: Arc<dyn Engine>) -> Result<(), AuthError> {
        let root = engine.root_path().to_owned();
        if engine.as_authorizer().is_none() {
            return Err(AuthError::NotAuthorizer { path: root });
        }

        let mut chain = self.chain.write().await;
        if chain.iter().any(|member| member.root_path() == root) {
            return Ok(());
        }

        let mut paths = self.load_paths().await?.unwrap_or_default();
        if !paths.contains(&root) {
            paths.push(root.clone());
            self.save_paths(&paths).await?;
        }
        chain.push(engine);

        info!(path = %root, members = chain.len(), "auth engine enabled");
        Ok(())
    }

    /// Offer the request to each chain member in order.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Engine`] as soon as a member fails.
    /// - [`AuthError::Unauthorized`] if no member accepts the request.
    pub async fn authorize(&self, req: &LogicalRequest) -> Result<(), AuthError> {
        let chain = self.chain.read().await;
        for member in chain.iter() {
            let Some(authorizer) = member.as_authorizer() else {
                continue;
            };
            if authorizer.authorize(req).await? {
                debug!(engine = %member.root_path(), "request authorized");
                return Ok(());
            }
        }
        Err(AuthError::Unauthorized)
    }

    /// Rebuild the in-memory chain from the persisted list. Members that no
    /// longer implement the authorization capability are skipped. Writes an
    /// empty list on first unseal.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Router`] if a persisted root path is not registered.
    /// - [`AuthError::Barrier`] or [`AuthError::Serialization`] on storage
    ///   failure.
    pub async fn post_unseal(&self, registry: &EngineRegistry) -> Result<(), AuthError> {
        let Some(paths) = self.load_paths().await? else {
            self.save_paths(&[]).await?;
            *self.chain.write().await = Vec::new();
            debug!("auth chain initialized empty");
            return Ok(());
        };

        let mut rebuilt = Vec::with_capacity(paths.len());
        for path in &paths {
            let mount = registry.resolve(path).await?;
            if mount.engine.as_authorizer().is_none() {
                warn!(path = %path, "persisted auth engine cannot authorize, skipped");
                continue;
            }
            rebuilt.push(mount.engine);
        }

        let members = rebuilt.len();
        *self.chain.write().await = rebuilt;
        info!(members, "auth chain rebuilt");
        Ok(())
    }

    /// Root paths of the current chain members, in order.
    pub async fn members(&self) -> Vec<String> {
        self.chain
            .read()
            .await
            .iter()
            .map(|member| member.root_path().to_owned())
            .collect()
    }

    async fn load_paths(&self) -> Result<Option<Vec<String>>, AuthError> {
        let Some(entry) = self.storage.get_ok(AUTH_CHAIN_PATH).await? else {
            return Ok(None);
        };
        let paths = serde_json::from_str(&entry.value).map_err(|e| AuthError::Serialization {
            reason: e.to_string(),
        })?;
        Ok(Some(paths))
    }

    async fn save_paths(&self, paths: &[String]) -> Result<(), AuthError> {
        let value = serde_json::to_string(paths).map_err(|e| AuthError::Serialization {
            reason: e.to_string(),
        })?;
        self.storage
            .update(AUTH_CHAIN_PATH, Entry::new(value), None)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for AuthChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthChain").finish_non_exhaustive()
    }
}
