//! Per-engine request dispatch.
//!
//! Each route pattern is compiled once into an anchored regex: literal
//! segments match verbatim and `:name` segments capture one path segment.
//! Routes are tried in declared order within their method bucket and the
//! first match wins.

use std::collections::HashMap;

use regex::Regex;
use tracing::{debug, error};

use crate::engine::{LogicalRequest, LogicalResponse, Method, Params, Route};
use crate::error::{EngineError, RouterError};

/// A route with its compiled matcher. Immutable after construction.
struct CompiledRoute {
    route: Route,
    matcher: Regex,
}

/// Routes `(method, path)` pairs to an engine's handlers.
pub struct RequestDispatcher {
    routes: HashMap<Method, Vec<CompiledRoute>>,
}

impl RequestDispatcher {
    /// Compile a route table.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidPath`] if a pattern has an unnamed
    /// parameter segment.
    pub fn new(routes: Vec<Route>) -> Result<Self, RouterError> {
        let mut compiled: HashMap<Method, Vec<CompiledRoute>> = HashMap::new();
        for route in routes {
            let matcher = compile(&route.pattern)?;
            compiled
                .entry(route.method)
                .or_default()
                .push(CompiledRoute { route, matcher });
        }
        Ok(Self { routes: compiled })
    }

    /// Declared routes, grouped by method.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.values().flatten().map(|c| &c.route)
    }

    /// Dispatch a request to the first matching route.
    ///
    /// An unmatched method or path yields a `404` response and an undecodable
    /// body a `400` response; neither is an error.
    ///
    /// # Errors
    ///
    /// - [`RouterError::FieldCountMismatch`] (wrapped) if the matched route's
    ///   declared fields disagree with its captures.
    /// - Whatever the handler returns.
    pub async fn dispatch(&self, req: LogicalRequest) -> Result<LogicalResponse, EngineError> {
        let path = normalize(&req.path);
        let Some(bucket) = self.routes.get(&req.method) else {
            return Ok(not_found(req.method, path));
        };

        for compiled in bucket {
            let Some(values) = capture_values(&compiled.matcher, path) else {
                continue;
            };
            let route = &compiled.route;

            let mut fields = HashMap::with_capacity(route.fields.len());
            if !route.fields.is_empty() {
                if values.len() != route.fields.len() {
                    let err = RouterError::FieldCountMismatch {
                        pattern: route.pattern.clone(),
                        expected: route.fields.len(),
                        actual: values.len(),
                    };
                    error!(error = %err, "malformed route table");
                    return Err(err.into());
                }
                for (field, value) in route.fields.iter().zip(values) {
                    fields.insert(field.name.clone(), value);
                }
            }

            let body = match &route.body {
                Some(decode) => match decode(&req.body) {
                    Ok(body) => Some(body),
                    Err(e) => {
                        debug!(pattern = %route.pattern, error = %e, "request body rejected");
                        return Ok(LogicalResponse::bad_request(format!(
                            "invalid request body: {e}"
                        )));
                    }
                },
                None => None,
            };

            debug!(method = %req.method, pattern = %route.pattern, "dispatching");
            let handler = route.handler.clone();
            return handler.call(Params::new(req, fields, body)).await;
        }

        Ok(not_found(req.method, path))
    }
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("routes", &self.routes().count())
            .finish()
    }
}

/// Compile `/a/:b/c` into `^/a/([^/]+)/c$`.
fn compile(pattern: &str) -> Result<Regex, RouterError> {
    let mut source = String::from("^");
    let normalized = normalize(pattern);
    for (i, segment) in normalized.split('/').enumerate() {
        if i > 0 {
            source.push('/');
        }
        if let Some(name) = segment.strip_prefix(':') {
            if name.is_empty() {
                return Err(RouterError::InvalidPath {
                    path: pattern.to_owned(),
                    reason: "parameter segment without a name".to_owned(),
                });
            }
            source.push_str("([^/]+)");
        } else {
            source.push_str(&regex::escape(segment));
        }
    }
    source.push('$');

    Regex::new(&source).map_err(|e| RouterError::InvalidPath {
        path: pattern.to_owned(),
        reason: e.to_string(),
    })
}

/// Captured parameter values in pattern order, or `None` if `path` does not match.
fn capture_values(matcher: &Regex, path: &str) -> Option<Vec<String>> {
    let captures = matcher.captures(path)?;
    Some(
        captures
            .iter()
            .skip(1)
            .flatten()
            .map(|m| m.as_str().to_owned())
            .collect(),
    )
}

/// Drop a trailing slash, keeping a bare `/`.
fn normalize(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some(trimmed) if !trimmed.is_empty() => trimmed,
        _ => path,
    }
}

fn not_found(method: Method, path: &str) -> LogicalResponse {
    LogicalResponse::not_found(format!("no route for {method} {path}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use serde::Deserialize;

    use super::*;

    fn echo(params: Params) -> impl Future<Output = Result<LogicalResponse, EngineError>> {
        let id = params.get("id").map(str::to_owned);
        let sub = params.get("sub").map(str::to_owned);
        async move { Ok(LogicalResponse::ok(serde_json::json!({ "id": id, "sub": sub }))) }
    }

    fn put(path: &str) -> LogicalRequest {
        LogicalRequest::new(Method::Put, path)
    }

    #[tokio::test]
    async fn extracts_named_parameter() {
        let dispatcher =
            RequestDispatcher::new(vec![Route::new(Method::Put, "/test/:id", echo).field("id", "")])
                .unwrap();

        let resp = dispatcher.dispatch(put("/test/123")).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["id"], "123");
    }

    #[tokio::test]
    async fn unmatched_path_is_not_found_not_field_error() {
        let dispatcher =
            RequestDispatcher::new(vec![Route::new(Method::Put, "/test/:id", echo).field("id", "")])
                .unwrap();

        let resp = dispatcher.dispatch(put("/test/123/params")).await.unwrap();
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn unknown_method_is_not_found() {
        let dispatcher =
            RequestDispatcher::new(vec![Route::new(Method::Put, "/test/:id", echo).field("id", "")])
                .unwrap();

        let resp = dispatcher
            .dispatch(LogicalRequest::new(Method::Delete, "/test/1"))
            .await
            .unwrap();
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn field_count_mismatch_is_an_error() {
        let dispatcher = RequestDispatcher::new(vec![
            Route::new(Method::Put, "/test/:id/:sub", echo).field("id", ""),
        ])
        .unwrap();

        let err = dispatcher.dispatch(put("/test/1/2")).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Router(RouterError::FieldCountMismatch {
                expected: 1,
                actual: 2,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn first_declared_match_wins() {
        let literal =
            |_params: Params| async { Ok::<_, EngineError>(LogicalResponse::message(200, "literal")) };
        let dispatcher = RequestDispatcher::new(vec![
            Route::new(Method::Put, "/test/special", literal),
            Route::new(Method::Put, "/test/:id", echo).field("id", ""),
        ])
        .unwrap();

        let special = dispatcher.dispatch(put("/test/special")).await.unwrap();
        assert_eq!(special.body["message"], "literal");
        let other = dispatcher.dispatch(put("/test/other/")).await.unwrap();
        assert_eq!(other.body["id"], "other");
    }

    #[tokio::test]
    async fn literal_segments_are_not_regex() {
        let dispatcher =
            RequestDispatcher::new(vec![Route::new(Method::Put, "/a.b/:id", echo).field("id", "")])
                .unwrap();
        assert_eq!(dispatcher.dispatch(put("/axb/1")).await.unwrap().status, 404);
        assert_eq!(dispatcher.dispatch(put("/a.b/1")).await.unwrap().status, 200);
    }

    #[derive(Deserialize)]
    struct Payload {
        value: String,
    }

    #[tokio::test]
    async fn body_is_decoded_before_handler() {
        let handler = |params: Params| async move {
            let body = params.body::<Payload>()?;
            Ok::<_, EngineError>(LogicalResponse::ok(serde_json::json!({ "got": body.value })))
        };
        let dispatcher =
            RequestDispatcher::new(vec![Route::new(Method::Post, "/test", handler).body::<Payload>()])
                .unwrap();

        let ok = dispatcher
            .dispatch(LogicalRequest::new(Method::Post, "/test").with_body(r#"{"value":"v"}"#))
            .await
            .unwrap();
        assert_eq!(ok.body["got"], "v");

        let bad = dispatcher
            .dispatch(LogicalRequest::new(Method::Post, "/test").with_body("not json"))
            .await
            .unwrap();
        assert_eq!(bad.status, 400);
    }

    #[tokio::test]
    async fn concurrent_requests_keep_their_own_params() {
        let dispatcher = Arc::new(
            RequestDispatcher::new(vec![
                Route::new(Method::Put, "/test/:id", |params: Params| async move {
                    tokio::task::yield_now().await;
                    Ok::<_, EngineError>(LogicalResponse::ok(
                        serde_json::json!({ "id": params.get("id") }),
                    ))
                })
                .field("id", ""),
            ])
            .unwrap(),
        );

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    let resp = dispatcher.dispatch(put(&format!("/test/{i}"))).await.unwrap();
                    (i, resp)
                })
            })
            .collect();

        for task in tasks {
            let (i, resp) = task.await.unwrap();
            assert_eq!(resp.body["id"], i.to_string());
        }
    }

    #[test]
    fn unnamed_parameter_is_rejected() {
        let err = RequestDispatcher::new(vec![Route::new(Method::Get, "/test/:", echo)]).unwrap_err();
        assert!(matches!(err, RouterError::InvalidPath { .. }));
    }
}
