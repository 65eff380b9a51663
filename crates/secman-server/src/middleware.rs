//! Authorization middleware for `secman`.
//!
//! Applies the same check as engine requests to the protected sys routes:
//! a valid `X-Secman-Token` root token passes, a wrong one is rejected, and
//! without the header the auth chain decides.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::error::AppError;
use crate::routes::logical_request;
use crate::state::AppState;

/// Middleware that authorizes a request before it reaches the handler.
///
/// # Errors
///
/// Returns [`AppError::Unauthorized`] if nothing accepts the request, or
/// [`AppError::Sealed`] if an auth engine needed storage while sealed.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let logical = logical_request(req.method(), req.uri().path(), req.headers(), Vec::new())?;
    state.core.authorize(&logical).await.map_err(|e| {
        debug!(path = %logical.path, error = %e, "request rejected");
        AppError::from(e)
    })?;
    Ok(next.run(req).await)
}
