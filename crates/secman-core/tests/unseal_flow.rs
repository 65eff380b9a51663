//! End-to-end tests for the sealed lifecycle.
//!
//! These drive the public API only: a barrier or a full `Core` over an
//! in-memory physical backend, shared between "restarts" by cloning it.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use secman_core::barrier::{Barrier, BarrierStorage, Entry, SealConfig};
use secman_core::core::Core;
use secman_core::engine::{LogicalRequest, Method};
use secman_core::engines::logopass::LOGOPASS_PATH;
use secman_core::engines::{KvEngine, LogopassEngine};
use secman_core::error::{AuthError, BarrierError, CoreError};
use secman_core::root_token::ROOT_TOKEN_HEADER;
use secman_storage::MemoryBackend;
use serde_json::json;

async fn core_over(storage: &MemoryBackend) -> Core {
    let core = Core::new(Arc::new(storage.clone()), SealConfig::default()).unwrap();
    core.register(Arc::new(KvEngine::new(core.storage())))
        .await
        .unwrap();
    core
}

fn as_root(req: LogicalRequest, token: &str) -> LogicalRequest {
    req.with_header(ROOT_TOKEN_HEADER, token)
}

// ── Barrier ──────────────────────────────────────────────────────────

#[tokio::test]
async fn three_of_five_unseal_then_read_write() {
    let barrier = Barrier::new(Arc::new(MemoryBackend::new()), SealConfig::default()).unwrap();
    let shares = barrier.init().await.unwrap();
    assert_eq!(shares.len(), 5);

    assert!(!barrier.unseal(&shares[0]).await.unwrap());
    assert!(!barrier.unseal(&shares[3]).await.unwrap());
    assert_eq!(barrier.info(), "AES256 SSS keys: 2/3");
    assert!(barrier.is_sealed());

    let err = barrier.get("a").await.unwrap_err();
    assert!(matches!(err, BarrierError::Sealed));

    assert!(barrier.unseal(&shares[4]).await.unwrap());
    assert!(!barrier.is_sealed());

    barrier.update("a", Entry::new("x"), None).await.unwrap();
    assert_eq!(barrier.get("a").await.unwrap().value, "x");
}

#[tokio::test]
async fn rotated_keys_survive_restart() {
    let storage = MemoryBackend::new();
    let config = SealConfig::new(2, 2).unwrap();

    let shares = {
        let barrier = Barrier::new(Arc::new(storage.clone()), config).unwrap();
        let shares = barrier.init().await.unwrap();
        barrier.unseal(&shares[0]).await.unwrap();
        barrier.unseal(&shares[1]).await.unwrap();
        barrier.update("before", Entry::new("1"), None).await.unwrap();
        barrier.rotate().await.unwrap();
        barrier.update("after", Entry::new("2"), None).await.unwrap();
        shares
    };

    let restarted = Barrier::new(Arc::new(storage), config).unwrap();
    restarted.unseal(&shares[1]).await.unwrap();
    assert!(restarted.unseal(&shares[0]).await.unwrap());
    assert_eq!(restarted.get("before").await.unwrap().value, "1");
    assert_eq!(restarted.get("after").await.unwrap().value, "2");
}

// ── Core ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn init_unseal_enable_and_use_kv() {
    let storage = MemoryBackend::new();
    let core = core_over(&storage).await;
    let init = core.init().await.unwrap();
    let token = init.root_token.as_str();

    for share in &init.shares[..3] {
        core.unseal(share).await.unwrap();
    }
    assert!(!core.status().await.unwrap().sealed);

    let enable = as_root(LogicalRequest::new(Method::Post, "/secrets/kv"), token);
    core.authorize(&enable).await.unwrap();
    let resp = core.enable_engine("/secrets/kv", &enable).await.unwrap();
    assert_eq!(resp.status, 200);

    let create = as_root(LogicalRequest::new(Method::Post, "/secrets/kv"), token)
        .with_json(&json!({"key": "db", "value": "hunter2"}))
        .unwrap();
    assert_eq!(core.handle(create).await.unwrap().status, 200);

    let show = as_root(LogicalRequest::new(Method::Get, "/secrets/kv/db"), token);
    let resp = core.handle(show).await.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body["value"], "hunter2");

    let list = as_root(LogicalRequest::new(Method::Get, "/secrets/kv"), token);
    assert_eq!(core.handle(list).await.unwrap().body, json!({"value": ["db"]}));
}

#[tokio::test]
async fn engine_state_is_recovered_after_restart() {
    let storage = MemoryBackend::new();
    let init = {
        let core = core_over(&storage).await;
        let init = core.init().await.unwrap();
        for share in &init.shares[..3] {
            core.unseal(share).await.unwrap();
        }
        let enable = LogicalRequest::new(Method::Post, "/secrets/kv");
        core.enable_engine("/secrets/kv", &enable).await.unwrap();
        let create = as_root(LogicalRequest::new(Method::Post, "/secrets/kv"), &init.root_token)
            .with_json(&json!({"key": "api", "value": "k-123"}))
            .unwrap();
        core.handle(create).await.unwrap();
        init
    };

    let core = core_over(&storage).await;
    assert!(core.status().await.unwrap().initialized);
    assert!(core.status().await.unwrap().sealed);
    for share in &init.shares[2..] {
        core.unseal(share).await.unwrap();
    }

    let show = as_root(LogicalRequest::new(Method::Get, "/secrets/kv/api"), &init.root_token);
    let resp = core.handle(show).await.unwrap();
    assert_eq!(resp.body["value"], "k-123");
}

#[tokio::test]
async fn second_init_is_rejected() {
    let core = core_over(&MemoryBackend::new()).await;
    core.init().await.unwrap();
    let err = core.init().await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Barrier(BarrierError::AlreadyInitialized)
    ));
}

#[tokio::test]
async fn disabled_engine_reports_not_enabled() {
    let core = core_over(&MemoryBackend::new()).await;
    let init = core.init().await.unwrap();
    for share in &init.shares[1..4] {
        core.unseal(share).await.unwrap();
    }

    let show = as_root(LogicalRequest::new(Method::Get, "/secrets/kv"), &init.root_token);
    let err = core.handle(show).await.unwrap_err();
    assert!(matches!(err, CoreError::Engine(ref e) if e.is_not_enabled()));
}

#[tokio::test]
async fn root_token_checks_work_while_sealed() {
    let core = core_over(&MemoryBackend::new()).await;
    let init = core.init().await.unwrap();

    let good = as_root(LogicalRequest::new(Method::Post, "/sys/unseal"), &init.root_token);
    core.authorize(&good).await.unwrap();

    let anonymous = LogicalRequest::new(Method::Post, "/sys/unseal");
    assert!(core.authorize(&anonymous).await.is_err());
}

// ── Login/password auth ──────────────────────────────────────────────

async fn core_with_logopass(storage: &MemoryBackend) -> Core {
    let core = core_over(storage).await;
    core.register(Arc::new(LogopassEngine::new(core.storage())))
        .await
        .unwrap();
    core
}

fn credentials(path: &str) -> LogicalRequest {
    LogicalRequest::new(Method::Post, path)
        .with_json(&json!({"login": "alice", "password": "correct horse"}))
        .unwrap()
}

fn bearer(req: LogicalRequest, token: &str) -> LogicalRequest {
    req.with_header("Authorization", format!("Bearer {token}"))
}

#[tokio::test]
async fn logopass_token_authorizes_without_root_token() {
    let storage = MemoryBackend::new();
    let core = core_with_logopass(&storage).await;
    let init = core.init().await.unwrap();
    for share in &init.shares[..3] {
        core.unseal(share).await.unwrap();
    }

    let enable_kv = LogicalRequest::new(Method::Post, "/secrets/kv");
    core.enable_engine("/secrets/kv", &enable_kv).await.unwrap();
    let enable_auth = LogicalRequest::new(Method::Post, LOGOPASS_PATH)
        .with_json(&json!({"token_ttl": 600}))
        .unwrap();
    let resp = core.enable_engine(LOGOPASS_PATH, &enable_auth).await.unwrap();
    assert_eq!(resp.status, 200);
    core.enable_auth(LOGOPASS_PATH).await.unwrap();
    assert_eq!(core.auth().members().await, vec![LOGOPASS_PATH.to_owned()]);

    let register = format!("{LOGOPASS_PATH}/register");
    assert_eq!(core.handle(credentials(&register)).await.unwrap().status, 200);
    let login = format!("{LOGOPASS_PATH}/login");
    let resp = core.handle(credentials(&login)).await.unwrap();
    assert_eq!(resp.status, 200);
    let jwt = resp.body["token"].as_str().unwrap().to_owned();

    let create = bearer(LogicalRequest::new(Method::Post, "/secrets/kv"), &jwt)
        .with_json(&json!({"key": "db", "value": "hunter2"}))
        .unwrap();
    assert_eq!(core.handle(create).await.unwrap().status, 200);

    let anonymous = LogicalRequest::new(Method::Get, "/secrets/kv/db");
    assert!(matches!(
        core.handle(anonymous).await.unwrap_err(),
        CoreError::Auth(AuthError::Unauthorized)
    ));

    drop(core);
    let core = core_with_logopass(&storage).await;
    for share in &init.shares[2..] {
        core.unseal(share).await.unwrap();
    }
    let show = bearer(LogicalRequest::new(Method::Get, "/secrets/kv/db"), &jwt);
    let resp = core.handle(show).await.unwrap();
    assert_eq!(resp.body["value"], "hunter2");
}
