//! Engine routes: `/api/engine/*path`
//!
//! Every method on every path is handed to the core, which resolves the
//! owning engine, authorizes and dispatches. The engine picks the status
//! code.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use axum::routing::any;

use crate::error::AppError;
use crate::routes::{engine_response, logical_request};
use crate::state::AppState;

/// Build the `/api/engine` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/{*path}", any(handle))
}

async fn handle(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let req = logical_request(&method, &format!("/{path}"), &headers, body.to_vec())?;
    let resp = state.core.handle(req).await?;
    Ok(engine_response(resp))
}
