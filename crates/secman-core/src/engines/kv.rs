//! Key-value secrets engine.
//!
//! Mounted at `/secrets/kv`. Each secret is a plaintext string stored at
//! `data/<key>` with a JSON metadata map at `metadata/<key>`, both inside the
//! engine's own `secrets/kv` namespace.
//!
//! | Method | Path | Action |
//! |--------|------|--------|
//! | GET | `/secrets/kv` | List keys |
//! | GET | `/secrets/kv/:key` | Read a value |
//! | GET | `/secrets/kv/:key/metadata` | Read metadata |
//! | POST | `/secrets/kv` | Create `{key, value}` |
//! | PUT | `/secrets/kv/:key/metadata` | Merge `{metadata}` |
//! | DELETE | `/secrets/kv/:key` | Delete value and metadata |

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::info;

use crate::barrier::{BarrierStorage, Entry};
use crate::engine::{Engine, LogicalRequest, LogicalResponse, Method, Params, Route};
use crate::error::EngineError;
use crate::logical_storage::LogicalStorage;

/// Mount point of the engine.
pub const KV_PATH: &str = "/secrets/kv";

const ENABLED_MARKER: &str = "enabled";
const DATA: &str = "data";
const METADATA: &str = "metadata";

/// Body of `POST /secrets/kv`.
#[derive(Debug, Deserialize)]
pub struct CreateSecret {
    pub key: String,
    pub value: String,
}

/// Body of `PUT /secrets/kv/:key/metadata`.
#[derive(Debug, Deserialize)]
pub struct UpdateMetadata {
    pub metadata: BTreeMap<String, String>,
}

/// The key-value engine.
#[derive(Clone)]
pub struct KvEngine {
    state: Arc<KvState>,
}

struct KvState {
    storage: LogicalStorage,
    /// Enablement flag; handlers hold the read side for their whole run.
    enabled: RwLock<bool>,
}

impl KvEngine {
    /// Create the engine over a barrier. It starts disabled.
    pub fn new(barrier: Arc<dyn BarrierStorage>) -> Self {
        Self {
            state: Arc::new(KvState {
                storage: LogicalStorage::new(barrier, KV_PATH),
                enabled: RwLock::new(false),
            }),
        }
    }

    fn route<F, Fut>(&self, method: Method, pattern: String, handler: F) -> Route
    where
        F: Fn(Arc<KvState>, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<LogicalResponse, EngineError>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        Route::new(method, pattern, move |params: Params| {
            handler(Arc::clone(&state), params)
        })
    }
}

impl KvState {
    async fn index(self: Arc<Self>, _params: Params) -> Result<LogicalResponse, EngineError> {
        let _enabled = self.ensure_enabled().await?;
        let keys: Vec<String> = self
            .storage
            .list(&format!("{DATA}/"))
            .await?
            .into_iter()
            .filter_map(|entry| {
                entry
                    .key
                    .strip_prefix(&format!("{DATA}/"))
                    .map(str::to_owned)
            })
            .collect();
        Ok(LogicalResponse::ok(json!({ "value": keys })))
    }

    async fn show(self: Arc<Self>, params: Params) -> Result<LogicalResponse, EngineError> {
        let _enabled = self.ensure_enabled().await?;
        let key = params.require("key")?;
        match self.storage.get_ok(&data_path(key)).await? {
            Some(entry) => Ok(LogicalResponse::ok(json!({ "value": entry.value }))),
            None => Ok(key_not_found(key)),
        }
    }

    async fn show_metadata(self: Arc<Self>, params: Params) -> Result<LogicalResponse, EngineError> {
        let _enabled = self.ensure_enabled().await?;
        let key = params.require("key")?;
        match self.load_metadata(key).await? {
            Some(metadata) => Ok(LogicalResponse::ok(json!({ "value": metadata }))),
            None => Ok(key_not_found(key)),
        }
    }

    async fn create(self: Arc<Self>, params: Params) -> Result<LogicalResponse, EngineError> {
        let _enabled = self.ensure_enabled().await?;
        let body = params.body::<CreateSecret>()?;
        if body.key.is_empty() || body.key.contains('/') {
            return Ok(LogicalResponse::bad_request(
                "key must be a non-empty single path segment",
            ));
        }

        if self.load_metadata(&body.key).await?.is_some() {
            return Ok(LogicalResponse::conflict("key already exists"));
        }

        self.storage
            .update(&data_path(&body.key), Entry::new(body.value.as_str()), None)
            .await?;
        let metadata = BTreeMap::from([(
            "created_at".to_owned(),
            chrono::Utc::now().to_rfc3339(),
        )]);
        self.save_metadata(&body.key, &metadata).await?;

        Ok(LogicalResponse::ok(json!({})))
    }

    async fn update_metadata(
        self: Arc<Self>,
        params: Params,
    ) -> Result<LogicalResponse, EngineError> {
        let _enabled = self.ensure_enabled().await?;
        let key = params.require("key")?;
        let body = params.body::<UpdateMetadata>()?;

        let Some(mut metadata) = self.load_metadata(key).await? else {
            return Ok(key_not_found(key));
        };
        metadata.extend(body.metadata.clone());
        self.save_metadata(key, &metadata).await?;

        Ok(LogicalResponse::ok(json!({})))
    }

    async fn delete(self: Arc<Self>, params: Params) -> Result<LogicalResponse, EngineError> {
        let _enabled = self.ensure_enabled().await?;
        let key = params.require("key")?;
        self.storage.delete(&data_path(key)).await?;
        self.storage.delete(&metadata_path(key)).await?;
        Ok(LogicalResponse::ok(json!({})))
    }

    /// Hold the read side of the enablement lock, failing if disabled.
    async fn ensure_enabled(&self) -> Result<tokio::sync::RwLockReadGuard<'_, bool>, EngineError> {
        let enabled = self.enabled.read().await;
        if !*enabled {
            return Err(EngineError::NotEnabled {
                path: KV_PATH.to_owned(),
            });
        }
        Ok(enabled)
    }

    async fn load_metadata(
        &self,
        key: &str,
    ) -> Result<Option<BTreeMap<String, String>>, EngineError> {
        let Some(entry) = self.storage.get_ok(&metadata_path(key)).await? else {
            return Ok(None);
        };
        let metadata = serde_json::from_str(&entry.value).map_err(|e| EngineError::Internal {
            reason: format!("corrupted metadata for '{key}': {e}"),
        })?;
        Ok(Some(metadata))
    }

    async fn save_metadata(
        &self,
        key: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), EngineError> {
        let value = serde_json::to_string(metadata).map_err(|e| EngineError::Internal {
            reason: e.to_string(),
        })?;
        self.storage
            .update(&metadata_path(key), Entry::new(value), None)
            .await?;
        Ok(())
    }
}

fn data_path(key: &str) -> String {
    format!("{DATA}/{key}")
}

fn metadata_path(key: &str) -> String {
    format!("{METADATA}/{key}")
}

fn key_not_found(key: &str) -> LogicalResponse {
    LogicalResponse::new(404, json!({ "error": "key not found", "key": key }))
}

#[async_trait::async_trait]
impl Engine for KvEngine {
    fn root_path(&self) -> &str {
        KV_PATH
    }

    fn help(&self) -> &str {
        "KV engine, stores string values under single-segment keys"
    }

    fn paths(&self) -> Vec<Route> {
        let item = format!("{KV_PATH}/:key");
        let item_metadata = format!("{KV_PATH}/:key/metadata");
        vec![
            self.route(Method::Get, KV_PATH.to_owned(), KvState::index)
                .describe("List keys"),
            self.route(Method::Get, item.clone(), KvState::show)
                .describe("Read a value")
                .field("key", "The key to read"),
            self.route(Method::Get, item_metadata.clone(), KvState::show_metadata)
                .describe("Read the metadata of a key")
                .field("key", "The key to read metadata of"),
            self.route(Method::Post, KV_PATH.to_owned(), KvState::create)
                .describe("Create a key-value pair")
                .body::<CreateSecret>(),
            self.route(Method::Put, item_metadata, KvState::update_metadata)
                .describe("Merge metadata into a key")
                .field("key", "The key to update")
                .body::<UpdateMetadata>(),
            self.route(Method::Delete, item, KvState::delete)
                .describe("Delete a key-value pair")
                .field("key", "The key to delete"),
        ]
    }

    async fn enable(&self, _req: &LogicalRequest) -> Result<LogicalResponse, EngineError> {
        let mut enabled = self.state.enabled.write().await;
        if *enabled {
            return Ok(LogicalResponse::message(304, "kv: already enabled"));
        }
        self.state
            .storage
            .update(ENABLED_MARKER, Entry::new("true"), None)
            .await?;
        *enabled = true;

        info!(path = KV_PATH, "kv engine enabled");
        Ok(LogicalResponse::message(200, "kv enabled"))
    }

    async fn post_unseal(&self) -> Result<(), EngineError> {
        let mut enabled = self.state.enabled.write().await;
        if self.state.storage.get_ok(ENABLED_MARKER).await?.is_none() {
            return Err(EngineError::NotEnabled {
                path: KV_PATH.to_owned(),
            });
        }
        *enabled = true;
        Ok(())
    }
}

impl std::fmt::Debug for KvEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvEngine")
            .field("storage", &self.state.storage)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secman_storage::MemoryBackend;

    use super::*;
    use crate::barrier::{Barrier, SealConfig};
    use crate::dispatcher::RequestDispatcher;

    async fn unsealed_barrier() -> Arc<Barrier> {
        let barrier = Barrier::new(Arc::new(MemoryBackend::new()), SealConfig::new(1, 1).unwrap())
            .unwrap();
        let shares = barrier.init().await.unwrap();
        barrier.unseal(&shares[0]).await.unwrap();
        Arc::new(barrier)
    }

    async fn enabled_engine() -> (KvEngine, RequestDispatcher) {
        let engine = KvEngine::new(unsealed_barrier().await);
        engine
            .enable(&LogicalRequest::new(Method::Post, KV_PATH))
            .await
            .unwrap();
        let dispatcher = RequestDispatcher::new(engine.paths()).unwrap();
        (engine, dispatcher)
    }

    fn create(key: &str, value: &str) -> LogicalRequest {
        LogicalRequest::new(Method::Post, KV_PATH)
            .with_json(&json!({ "key": key, "value": value }))
            .unwrap()
    }

    #[tokio::test]
    async fn create_then_show() {
        let (_, dispatcher) = enabled_engine().await;

        let created = dispatcher.dispatch(create("db", "hunter2")).await.unwrap();
        assert_eq!(created.status, 200);

        let shown = dispatcher
            .dispatch(LogicalRequest::new(Method::Get, "/secrets/kv/db"))
            .await
            .unwrap();
        assert_eq!(shown.status, 200);
        assert_eq!(shown.body["value"], "hunter2");
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let (_, dispatcher) = enabled_engine().await;
        dispatcher.dispatch(create("db", "a")).await.unwrap();
        let second = dispatcher.dispatch(create("db", "b")).await.unwrap();
        assert_eq!(second.status, 409);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let (_, dispatcher) = enabled_engine().await;
        let resp = dispatcher
            .dispatch(LogicalRequest::new(Method::Get, "/secrets/kv/nope"))
            .await
            .unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body["key"], "nope");
    }

    #[tokio::test]
    async fn index_lists_keys_only() {
        let (_, dispatcher) = enabled_engine().await;
        dispatcher.dispatch(create("b", "2")).await.unwrap();
        dispatcher.dispatch(create("a", "1")).await.unwrap();

        let resp = dispatcher
            .dispatch(LogicalRequest::new(Method::Get, KV_PATH))
            .await
            .unwrap();
        assert_eq!(resp.body["value"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn metadata_is_created_and_merged() {
        let (_, dispatcher) = enabled_engine().await;
        dispatcher.dispatch(create("db", "x")).await.unwrap();

        let update = LogicalRequest::new(Method::Put, "/secrets/kv/db/metadata")
            .with_json(&json!({ "metadata": { "owner": "ops" } }))
            .unwrap();
        assert_eq!(dispatcher.dispatch(update).await.unwrap().status, 200);

        let resp = dispatcher
            .dispatch(LogicalRequest::new(Method::Get, "/secrets/kv/db/metadata"))
            .await
            .unwrap();
        assert_eq!(resp.body["value"]["owner"], "ops");
        assert!(resp.body["value"]["created_at"].is_string());
    }

    #[tokio::test]
    async fn delete_removes_value_and_metadata() {
        let (_, dispatcher) = enabled_engine().await;
        dispatcher.dispatch(create("db", "x")).await.unwrap();

        let deleted = dispatcher
            .dispatch(LogicalRequest::new(Method::Delete, "/secrets/kv/db"))
            .await
            .unwrap();
        assert_eq!(deleted.status, 200);

        for path in ["/secrets/kv/db", "/secrets/kv/db/metadata"] {
            let resp = dispatcher
                .dispatch(LogicalRequest::new(Method::Get, path))
                .await
                .unwrap();
            assert_eq!(resp.status, 404);
        }
    }

    #[tokio::test]
    async fn bad_body_and_bad_key_are_rejected() {
        let (_, dispatcher) = enabled_engine().await;
        let garbage = LogicalRequest::new(Method::Post, KV_PATH).with_body("{");
        assert_eq!(dispatcher.dispatch(garbage).await.unwrap().status, 400);
        assert_eq!(dispatcher.dispatch(create("a/b", "x")).await.unwrap().status, 400);
    }

    #[tokio::test]
    async fn disabled_engine_refuses_requests() {
        let engine = KvEngine::new(unsealed_barrier().await);
        let dispatcher = RequestDispatcher::new(engine.paths()).unwrap();

        let err = dispatcher
            .dispatch(LogicalRequest::new(Method::Get, KV_PATH))
            .await
            .unwrap_err();
        assert!(err.is_not_enabled());
    }

    #[tokio::test]
    async fn enable_twice_is_not_modified() {
        let (engine, _) = enabled_engine().await;
        let again = engine
            .enable(&LogicalRequest::new(Method::Post, KV_PATH))
            .await
            .unwrap();
        assert_eq!(again.status, 304);
    }

    #[tokio::test]
    async fn post_unseal_restores_enablement() {
        let barrier = unsealed_barrier().await;
        let first = KvEngine::new(barrier.clone());
        assert!(first.post_unseal().await.unwrap_err().is_not_enabled());
        first
            .enable(&LogicalRequest::new(Method::Post, KV_PATH))
            .await
            .unwrap();

        let restarted = KvEngine::new(barrier);
        restarted.post_unseal().await.unwrap();
        let dispatcher = RequestDispatcher::new(restarted.paths()).unwrap();
        let resp = dispatcher
            .dispatch(LogicalRequest::new(Method::Get, KV_PATH))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
    }
}
