//! System routes: `/api/sys/*`
//!
//! Handles initialization, unseal, engine enablement and key rotation.
//! Status and init are open; everything else requires authorization.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::middleware as axum_mw;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use secman_core::core::{CoreStatus, InitResult, UnsealOutcome};

use crate::error::AppError;
use crate::middleware::require_auth;
use crate::routes::{engine_response, logical_request};
use crate::state::AppState;

/// Build the `/api/sys` router.
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let protected = Router::new()
        .route("/unseal", post(unseal))
        .route("/enable/{*path}", post(enable_engine))
        .route("/auth/enable/{*path}", post(enable_auth))
        .route("/rotate", post(rotate))
        .route_layer(axum_mw::from_fn_with_state(state, require_auth));

    Router::new()
        .route("/status", get(status))
        .route("/init", post(init))
        .merge(protected)
}

// ── Request / Response types ─────────────────────────────────────────

/// Request body for `POST /api/sys/unseal`.
#[derive(Debug, Deserialize)]
pub struct UnsealRequest {
    /// Base64-encoded unseal share.
    pub key: String,
}

/// Response body for `POST /api/sys/auth/enable/*path`.
#[derive(Debug, Serialize)]
pub struct EnableAuthResponse {
    /// Auth chain members after the change, in order.
    pub chain: Vec<String>,
}

/// Response body for `POST /api/sys/rotate`.
#[derive(Debug, Serialize)]
pub struct RotateResponse {
    /// Id of the new active data key.
    pub key_id: u32,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn status(State(state): State<Arc<AppState>>) -> Result<Json<CoreStatus>, AppError> {
    Ok(Json(state.core.status().await?))
}

/// Initialize the barrier. The shares and root token are returned once.
async fn init(State(state): State<Arc<AppState>>) -> Result<Json<InitResult>, AppError> {
    let result = state.core.init().await?;
    info!(shares = result.shares.len(), "initialized");
    Ok(Json(result))
}

/// Submit one unseal share.
async fn unseal(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UnsealRequest>,
) -> Result<Json<UnsealOutcome>, AppError> {
    Ok(Json(state.core.unseal(&body.key).await?))
}

/// Enable the engine mounted at `path`. The request body is passed through.
async fn enable_engine(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    method: axum::http::Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let path = format!("/{path}");
    let req = logical_request(&method, &path, &headers, body.to_vec())?;
    let resp = state.core.enable_engine(&path, &req).await?;
    Ok(engine_response(resp))
}

/// Add the engine mounted at `path` to the auth chain.
async fn enable_auth(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Json<EnableAuthResponse>, AppError> {
    state.core.enable_auth(&format!("/{path}")).await?;
    Ok(Json(EnableAuthResponse {
        chain: state.core.auth().members().await,
    }))
}

async fn rotate(State(state): State<Arc<AppState>>) -> Result<Json<RotateResponse>, AppError> {
    let key_id = state.core.rotate().await?;
    Ok(Json(RotateResponse { key_id }))
}
