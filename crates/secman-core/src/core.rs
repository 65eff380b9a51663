//! Sealed-state orchestration.
//!
//! [`Core`] ties the barrier, the engine registry, the auth chain and the
//! root token together and is the only type the transport layer talks to.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use secman_storage::StorageBackend;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::AuthChain;
use crate::barrier::{Barrier, BarrierStorage, SealConfig};
use crate::engine::{Engine, LogicalRequest, LogicalResponse};
use crate::error::{AuthError, BarrierError, CoreError};
use crate::registry::EngineRegistry;
use crate::root_token::{ROOT_TOKEN_HEADER, RootTokens};

/// Output of a successful [`Core::init`]. Shown once, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct InitResult {
    /// Base64-encoded unseal shares.
    pub shares: Vec<String>,
    /// Root token bypassing the auth chain.
    pub root_token: String,
}

/// Result of submitting one unseal share.
#[derive(Debug, Clone, Serialize)]
pub struct UnsealOutcome {
    pub sealed: bool,
    /// e.g. `AES256 SSS keys: 2/3`
    pub progress: String,
}

/// Point-in-time lifecycle status.
#[derive(Debug, Clone, Serialize)]
pub struct CoreStatus {
    pub initialized: bool,
    pub sealed: bool,
    pub progress: String,
}

/// The secrets manager core.
///
/// The core counts as unsealed only once the barrier is open AND every
/// engine and the auth chain recovered their state. Until then requests are
/// refused as sealed, even if the barrier itself already holds its keys.
#[derive(Debug)]
pub struct Core {
    barrier: Arc<Barrier>,
    registry: EngineRegistry,
    auth: AuthChain,
    root_tokens: RootTokens,
    /// Set after post-unseal recovery succeeded.
    ready: AtomicBool,
    /// Serializes init and unseal.
    lifecycle: Mutex<()>,
}

impl Core {
    /// Build a sealed core over `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Barrier`] if `config` is invalid.
    pub fn new(storage: Arc<dyn StorageBackend>, config: SealConfig) -> Result<Self, CoreError> {
        let barrier = Arc::new(Barrier::new(storage, config)?);
        Ok(Self {
            auth: AuthChain::new(barrier.clone()),
            root_tokens: RootTokens::new(barrier.clone()),
            registry: EngineRegistry::new(),
            barrier,
            ready: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
        })
    }

    /// The barrier, for engines that need plaintext storage.
    #[must_use]
    pub fn barrier(&self) -> Arc<Barrier> {
        Arc::clone(&self.barrier)
    }

    /// The barrier as the storage trait engines are built over.
    #[must_use]
    pub fn storage(&self) -> Arc<dyn BarrierStorage> {
        self.barrier.clone()
    }

    #[must_use]
    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    #[must_use]
    pub fn auth(&self) -> &AuthChain {
        &self.auth
    }

    /// Register an engine at its root path.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Router`] on a duplicate or invalid root path.
    pub async fn register(&self, engine: Arc<dyn Engine>) -> Result<(), CoreError> {
        self.registry.register(engine).await?;
        Ok(())
    }

    /// Mint the root token and initialize the barrier.
    ///
    /// The root token hash is written before the seal config, so a store
    /// only reads as initialized once both exist. If any write fails the
    /// store stays uninitialized and init may be retried.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::AlreadyInitialized`] (wrapped) on a second call.
    pub async fn init(&self) -> Result<InitResult, CoreError> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.barrier.is_initialized().await? {
            return Err(BarrierError::AlreadyInitialized.into());
        }
        let root_token = self.root_tokens.create().await?;
        let shares = self.barrier.init().await?;
        Ok(InitResult {
            shares: shares.iter().map(|s| BASE64.encode(s)).collect(),
            root_token,
        })
    }

    /// Submit one base64-encoded unseal share. On the share that completes
    /// the quorum, engines and the auth chain recover their state.
    ///
    /// If recovery failed on an earlier call the barrier is already open;
    /// the next call skips the quorum and only retries recovery.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidShareEncoding`] for bad base64.
    /// - [`CoreError::Barrier`] for unseal failures, including
    ///   [`BarrierError::AlreadyUnsealed`] once the core is ready.
    /// - [`CoreError::Engine`] or [`CoreError::Auth`] if post-unseal
    ///   recovery fails. The core keeps reporting sealed in that case.
    pub async fn unseal(&self, share_b64: &str) -> Result<UnsealOutcome, CoreError> {
        let share = zeroize::Zeroizing::new(BASE64.decode(share_b64.trim()).map_err(|e| {
            CoreError::InvalidShareEncoding {
                reason: e.to_string(),
            }
        })?);

        let _lifecycle = self.lifecycle.lock().await;
        if self.is_ready() {
            return Err(BarrierError::AlreadyUnsealed.into());
        }

        if self.barrier.is_sealed() {
            if !self.barrier.unseal(&share).await? {
                return Ok(self.outcome());
            }
        } else {
            debug!("barrier already open, retrying post-unseal recovery");
        }

        if let Err(e) = self.recover().await {
            warn!(error = %e, "post-unseal recovery failed, core stays sealed");
            return Err(e);
        }
        self.ready.store(true, Ordering::Release);
        info!("core unsealed");

        Ok(self.outcome())
    }

    /// Current lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Barrier`] if storage cannot be read.
    pub async fn status(&self) -> Result<CoreStatus, CoreError> {
        Ok(CoreStatus {
            initialized: self.barrier.is_initialized().await?,
            sealed: !self.is_ready(),
            progress: self.barrier.info(),
        })
    }

    /// Check the root token header, or fall back to the auth chain when the
    /// header is absent. A wrong root token is rejected outright.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthorized`] (wrapped) when nothing accepts the
    /// request.
    pub async fn authorize(&self, req: &LogicalRequest) -> Result<(), CoreError> {
        if let Some(token) = req.header(ROOT_TOKEN_HEADER) {
            if self.root_tokens.verify(token).await? {
                return Ok(());
            }
            debug!("root token rejected");
            return Err(AuthError::Unauthorized.into());
        }
        self.auth.authorize(req).await?;
        Ok(())
    }

    /// Enable the engine mounted at `path`.
    ///
    /// # Errors
    ///
    /// Fails while sealed, for an unknown path, or if the engine fails.
    pub async fn enable_engine(
        &self,
        path: &str,
        req: &LogicalRequest,
    ) -> Result<LogicalResponse, CoreError> {
        self.ensure_unsealed()?;
        let mount = self.registry.resolve(path).await?;
        Ok(mount.engine.enable(req).await?)
    }

    /// Add the engine mounted at `path` to the auth chain.
    ///
    /// # Errors
    ///
    /// Fails while sealed, for an unknown path, or if the engine cannot
    /// authorize.
    pub async fn enable_auth(&self, path: &str) -> Result<(), CoreError> {
        self.ensure_unsealed()?;
        let mount = self.registry.resolve(path).await?;
        self.auth.enable_engine(mount.engine).await?;
        Ok(())
    }

    /// Rotate the barrier's data key.
    ///
    /// # Errors
    ///
    /// Fails while sealed or if the new key cannot be persisted.
    pub async fn rotate(&self) -> Result<u32, CoreError> {
        self.ensure_unsealed()?;
        Ok(self.barrier.rotate().await?)
    }

    /// Authorize and dispatch an engine request.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] (wrapped) while sealed.
    /// - [`CoreError::Router`] if no engine owns the path.
    /// - [`CoreError::Auth`] if the request is not authorized.
    /// - [`CoreError::Engine`] for handler failures.
    pub async fn handle(&self, req: LogicalRequest) -> Result<LogicalResponse, CoreError> {
        self.ensure_unsealed()?;
        let mount = self.registry.resolve(&req.path).await?;
        self.authorize(&req).await?;
        Ok(mount.dispatcher.dispatch(req).await?)
    }

    /// Whether the barrier is open and post-unseal recovery succeeded.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn recover(&self) -> Result<(), CoreError> {
        self.registry.post_unseal_engines().await?;
        self.auth.post_unseal(&self.registry).await?;
        Ok(())
    }

    fn outcome(&self) -> UnsealOutcome {
        UnsealOutcome {
            sealed: !self.is_ready(),
            progress: self.barrier.info(),
        }
    }

    fn ensure_unsealed(&self) -> Result<(), CoreError> {
        if !self.is_ready() {
            return Err(BarrierError::Sealed.into());
        }
        Ok(())
    }
}
