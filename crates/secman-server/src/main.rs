//! `secman` server entry point.
//!
//! Bootstraps the storage backend and the sealed core, registers the
//! built-in engines, then starts the Axum HTTP server with graceful shutdown.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use secman_core::barrier::SealConfig;
use secman_core::core::Core;
use secman_core::engines::{KvEngine, LogopassEngine};
use secman_storage::{MemoryBackend, StorageBackend};

use secman_server::config::{ServerConfig, StorageBackendType};
use secman_server::routes;
use secman_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(storage = ?config.storage_backend, "secman starting");

    let state = build_app_state(&config).await?;
    let app = routes::router(state, config.request_timeout);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "secman server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("secman server stopped");
    Ok(())
}

/// Open storage, build the sealed core and register the built-in engines.
async fn build_app_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let storage: Arc<dyn StorageBackend> = match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Arc::new(MemoryBackend::new())
        }
        #[cfg(feature = "rocksdb-backend")]
        StorageBackendType::RocksDb { path } => {
            info!(path = %path, "using RocksDB storage");
            Arc::new(
                secman_storage::RocksDbBackend::open(path)
                    .context("failed to open RocksDB storage")?,
            )
        }
        #[cfg(not(feature = "rocksdb-backend"))]
        StorageBackendType::RocksDb { .. } => {
            anyhow::bail!("RocksDB backend requested but feature 'rocksdb-backend' is not enabled");
        }
    };

    let seal_config = SealConfig::new(config.seal_shares, config.seal_threshold)
        .context("invalid seal configuration")?;
    let core = Core::new(storage, seal_config).context("failed to build core")?;

    core.register(Arc::new(KvEngine::new(core.storage())))
        .await
        .context("failed to register kv engine")?;
    core.register(Arc::new(LogopassEngine::new(core.storage())))
        .await
        .context("failed to register logopass engine")?;

    let status = core.status().await.context("failed to read seal status")?;
    info!(
        initialized = status.initialized,
        engines = ?core.registry().root_paths().await,
        "core ready, sealed"
    );

    Ok(Arc::new(AppState::new(Arc::new(core))))
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}
