//! Engine contract.
//!
//! An engine is a pluggable secret module mounted at a root path. It declares
//! a route table once, at registration, and the
//! [`RequestDispatcher`](crate::dispatcher::RequestDispatcher) routes
//! requests into it. Engines that can authenticate requests additionally
//! expose an [`Authorizer`] through [`Engine::as_authorizer`].

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::EngineError;

/// Request method, independent of any transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Upper-case method name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(EngineError::InvalidRequest {
                reason: format!("unsupported method '{other}'"),
            }),
        }
    }
}

/// A transport-neutral request addressed to an engine.
#[derive(Debug, Clone)]
pub struct LogicalRequest {
    pub method: Method,
    /// Full logical path, including the engine root (e.g. `/secrets/kv/db`).
    pub path: String,
    /// Header names are stored lower-case.
    pub headers: HashMap<String, String>,
    /// Raw request body.
    pub body: Vec<u8>,
}

impl LogicalRequest {
    /// A request without headers or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Set the raw body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the body to `value` serialized as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRequest`] if `value` cannot be serialized.
    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self, EngineError> {
        self.body = serde_json::to_vec(value).map_err(|e| EngineError::InvalidRequest {
            reason: e.to_string(),
        })?;
        Ok(self)
    }

    /// Look up a header, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// An engine's answer, with an HTTP-style status code and a JSON body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogicalResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl LogicalResponse {
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self { status, body }
    }

    /// `200` with `body`.
    pub fn ok(body: serde_json::Value) -> Self {
        Self::new(200, body)
    }

    /// `{"message": ...}` with the given status.
    pub fn message(status: u16, message: impl Into<String>) -> Self {
        Self::new(status, serde_json::json!({ "message": message.into() }))
    }

    /// `{"error": ...}` with the given status.
    pub fn error(status: u16, error: impl Into<String>) -> Self {
        Self::new(status, serde_json::json!({ "error": error.into() }))
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::error(404, error)
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::error(400, error)
    }

    pub fn conflict(error: impl Into<String>) -> Self {
        Self::error(409, error)
    }
}

/// Values extracted for one dispatched request.
///
/// Built fresh per request; nothing here is shared between requests.
pub struct Params {
    request: LogicalRequest,
    fields: HashMap<String, String>,
    body: Option<Box<dyn Any + Send + Sync>>,
}

impl Params {
    pub(crate) fn new(
        request: LogicalRequest,
        fields: HashMap<String, String>,
        body: Option<Box<dyn Any + Send + Sync>>,
    ) -> Self {
        Self {
            request,
            fields,
            body,
        }
    }

    /// The request being handled.
    #[must_use]
    pub fn request(&self) -> &LogicalRequest {
        &self.request
    }

    /// A named path parameter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// A named path parameter the route is known to declare.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRequest`] if the parameter is missing.
    pub fn require(&self, name: &str) -> Result<&str, EngineError> {
        self.get(name).ok_or_else(|| EngineError::InvalidRequest {
            reason: format!("missing path parameter '{name}'"),
        })
    }

    /// The decoded body, if the route declared one of type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingBody`] if the route has no body or a
    /// body of another type.
    pub fn body<T: Any>(&self) -> Result<&T, EngineError> {
        self.body
            .as_deref()
            .and_then(|body| body.downcast_ref::<T>())
            .ok_or(EngineError::MissingBody)
    }
}

impl fmt::Debug for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Params")
            .field("method", &self.request.method)
            .field("path", &self.request.path)
            .field("fields", &self.fields)
            .field("body", &self.body.is_some())
            .finish()
    }
}

/// A route handler.
///
/// Implemented for every `Fn(Params) -> impl Future` closure, so handlers
/// are usually written as `move |params| async move { ... }`.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, params: Params) -> Result<LogicalResponse, EngineError>;
}

#[async_trait::async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Params) -> Fut + Send + Sync,
    Fut: Future<Output = Result<LogicalResponse, EngineError>> + Send,
{
    async fn call(&self, params: Params) -> Result<LogicalResponse, EngineError> {
        self(params).await
    }
}

/// Decodes a raw request body into a fresh, type-erased value.
pub(crate) type BodyFactory =
    Arc<dyn Fn(&[u8]) -> Result<Box<dyn Any + Send + Sync>, serde_json::Error> + Send + Sync>;

/// A declared path parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub description: String,
}

/// One entry of an engine's route table.
///
/// ```
/// # use secman_core::engine::{LogicalResponse, Method, Params, Route};
/// # use secman_core::error::EngineError;
/// let route = Route::new(Method::Put, "/test/:id", |params: Params| async move {
///     Ok::<_, EngineError>(LogicalResponse::ok(serde_json::json!({ "id": params.get("id") })))
/// })
/// .describe("Update a test entry")
/// .field("id", "Entry id");
/// assert_eq!(route.fields.len(), 1);
/// ```
#[derive(Clone)]
pub struct Route {
    pub method: Method,
    /// Path pattern; `:name` segments capture one path segment.
    pub pattern: String,
    pub description: String,
    /// Declared parameters, in the order their segments appear.
    pub fields: Vec<Field>,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) body: Option<BodyFactory>,
}

impl Route {
    pub fn new(method: Method, pattern: impl Into<String>, handler: impl Handler + 'static) -> Self {
        Self {
            method,
            pattern: pattern.into(),
            description: String::new(),
            fields: Vec::new(),
            handler: Arc::new(handler),
            body: None,
        }
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare the next path parameter.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.fields.push(Field {
            name: name.into(),
            description: description.into(),
        });
        self
    }

    /// Decode the request body as JSON into a fresh `T` before the handler
    /// runs. Handlers read it with [`Params::body`].
    #[must_use]
    pub fn body<T>(mut self) -> Self
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.body = Some(Arc::new(|raw: &[u8]| {
            let value: T = serde_json::from_slice(raw)?;
            Ok(Box::new(value) as Box<dyn Any + Send + Sync>)
        }));
        self
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("fields", &self.fields)
            .field("body", &self.body.is_some())
            .finish_non_exhaustive()
    }
}

/// Optional capability: authenticate requests that carry no root token.
#[async_trait::async_trait]
pub trait Authorizer: Send + Sync {
    /// `Ok(true)` accepts the request, `Ok(false)` passes it to the next
    /// chain member, an error aborts the chain.
    async fn authorize(&self, req: &LogicalRequest) -> Result<bool, EngineError>;
}

/// A pluggable secret engine.
#[async_trait::async_trait]
pub trait Engine: Send + Sync {
    /// Mount point, e.g. `/secrets/kv`.
    fn root_path(&self) -> &str;

    /// One-line description for operators.
    fn help(&self) -> &str {
        ""
    }

    /// Route table, compiled once at registration.
    fn paths(&self) -> Vec<Route>;

    /// Turn the engine on and persist that fact.
    async fn enable(&self, req: &LogicalRequest) -> Result<LogicalResponse, EngineError>;

    /// Recover enablement state after the barrier unseals. Return
    /// [`EngineError::NotEnabled`] if the engine was never enabled.
    async fn post_unseal(&self) -> Result<(), EngineError>;

    /// Capability query for [`Authorizer`].
    fn as_authorizer(&self) -> Option<&dyn Authorizer> {
        None
    }
}
