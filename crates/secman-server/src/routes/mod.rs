//! HTTP routes.
//!
//! Handlers translate between HTTP and the core's transport-neutral
//! [`LogicalRequest`]/[`LogicalResponse`] and nothing more.

pub mod engine;
pub mod sys;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use secman_core::engine::{LogicalRequest, LogicalResponse, Method};

use crate::error::AppError;
use crate::state::AppState;

/// Maximum concurrent requests on the sys routes.
const SYS_CONCURRENCY_LIMIT: usize = 10;

/// Build the full application router.
///
/// Requests still running after `request_timeout` are dropped, which cancels
/// any storage call they are waiting on.
pub fn router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    let sys_routes = Router::new()
        .nest("/api/sys", sys::router(Arc::clone(&state)))
        .layer(tower::limit::ConcurrencyLimitLayer::new(SYS_CONCURRENCY_LIMIT));

    Router::new()
        .merge(sys_routes)
        .nest("/api/engine", engine::router())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}

/// Build a [`LogicalRequest`] from HTTP request parts. Headers that are not
/// valid UTF-8 are dropped.
///
/// # Errors
///
/// Returns [`AppError::BadRequest`] for methods engines do not support.
pub fn logical_request(
    method: &axum::http::Method,
    path: &str,
    headers: &HeaderMap,
    body: Vec<u8>,
) -> Result<LogicalRequest, AppError> {
    let method =
        Method::from_str(method.as_str()).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let mut req = LogicalRequest::new(method, path).with_body(body);
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            req = req.with_header(name.as_str(), value);
        }
    }
    Ok(req)
}

/// Render an engine response with its own status code.
pub fn engine_response(resp: LogicalResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, axum::Json(resp.body)).into_response()
}
