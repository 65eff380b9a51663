//! Login/password auth engine.
//!
//! Mounted at `/auth/logopass`. Users register with a login and a password,
//! log in to receive an HS256 JWT, and present it as `Authorization: Bearer
//! <jwt>` on later requests. Every token points at a session stored behind
//! the barrier; a token whose session expired or vanished is rejected even if
//! its signature is valid.
//!
//! | Method | Path | Action |
//! |--------|------|--------|
//! | GET | `/auth/logopass` | Show token TTL |
//! | POST | `/auth/logopass/register` | Register `{login, password}` |
//! | POST | `/auth/logopass/login` | Log in `{login, password}`, returns `{token}` |
//!
//! Register and login are open: the engine's authorizer accepts them without
//! a token.

use std::sync::Arc;
use std::time::Duration;

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::barrier::{BarrierStorage, Entry};
use crate::crypto::EncryptionKey;
use crate::engine::{Authorizer, Engine, LogicalRequest, LogicalResponse, Method, Params, Route};
use crate::error::EngineError;
use crate::logical_storage::LogicalStorage;

/// Mount point of the engine.
pub const LOGOPASS_PATH: &str = "/auth/logopass";

/// Token lifetime used when `enable` does not set one.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

const PARAMS: &str = "params";
const USERS: &str = "users";
const SESSIONS: &str = "sessions";

/// Engine settings, persisted at enable time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogopassParams {
    /// Session and token lifetime in seconds.
    #[serde(default = "default_token_ttl")]
    pub token_ttl: u64,
    /// HMAC key for tokens. Generated when left empty.
    #[serde(default)]
    pub secret_key: String,
}

fn default_token_ttl() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}

/// Body of `POST /auth/logopass/register` and `/login`.
#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct User {
    login: String,
    password_hash: String,
    created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Session {
    sid: String,
    sub: String,
    created_at: i64,
    expires_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sid: String,
    sub: String,
    iat: i64,
    exp: i64,
}

/// The login/password engine.
#[derive(Clone)]
pub struct LogopassEngine {
    state: Arc<LogopassState>,
}

struct LogopassState {
    storage: LogicalStorage,
    /// `None` until enabled.
    params: RwLock<Option<LogopassParams>>,
    /// Serializes registrations so a login is claimed once.
    registrations: Mutex<()>,
}

impl LogopassEngine {
    /// Create the engine over a barrier. It starts disabled.
    pub fn new(barrier: Arc<dyn BarrierStorage>) -> Self {
        Self {
            state: Arc::new(LogopassState {
                storage: LogicalStorage::new(barrier, LOGOPASS_PATH),
                params: RwLock::new(None),
                registrations: Mutex::new(()),
            }),
        }
    }

    fn route<F, Fut>(&self, method: Method, pattern: String, handler: F) -> Route
    where
        F: Fn(Arc<LogopassState>, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<LogicalResponse, EngineError>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        Route::new(method, pattern, move |params: Params| {
            handler(Arc::clone(&state), params)
        })
    }
}

impl LogopassState {
    async fn show_params(self: Arc<Self>, _params: Params) -> Result<LogicalResponse, EngineError> {
        let params = self.params().await?;
        Ok(LogicalResponse::ok(json!({ "token_ttl": params.token_ttl })))
    }

    async fn register(self: Arc<Self>, params: Params) -> Result<LogicalResponse, EngineError> {
        self.params().await?;
        let body = params.body::<Credentials>()?;
        if body.login.is_empty() || body.login.contains('/') {
            return Ok(LogicalResponse::bad_request(
                "login must be a non-empty single path segment",
            ));
        }
        if body.password.is_empty() {
            return Ok(LogicalResponse::bad_request("password must not be empty"));
        }

        let _registration = self.registrations.lock().await;
        if self.storage.get_ok(&user_path(&body.login)).await?.is_some() {
            return Ok(LogicalResponse::bad_request(
                "user with this login already exists",
            ));
        }

        let user = User {
            login: body.login.clone(),
            password_hash: hash_password(body.password.clone()).await?,
            created_at: Utc::now().to_rfc3339(),
        };
        self.storage
            .update(&user_path(&body.login), Entry::new(to_json(&user)?), None)
            .await?;

        info!(login = %body.login, "user registered");
        Ok(LogicalResponse::ok(json!({})))
    }

    async fn login(self: Arc<Self>, params: Params) -> Result<LogicalResponse, EngineError> {
        let settings = self.params().await?;
        let body = params.body::<Credentials>()?;

        if body.login.is_empty() || body.login.contains('/') {
            return Ok(invalid_credentials());
        }
        let Some(entry) = self.storage.get_ok(&user_path(&body.login)).await? else {
            return Ok(invalid_credentials());
        };
        let user = from_json::<User>(&entry.value)?;
        if !verify_password(body.password.clone(), user.password_hash).await? {
            debug!(login = %body.login, "password mismatch");
            return Ok(invalid_credentials());
        }

        let now = Utc::now().timestamp();
        let ttl = i64::try_from(settings.token_ttl).unwrap_or(i64::MAX);
        let session = Session {
            sid: uuid::Uuid::new_v4().to_string(),
            sub: user.login,
            created_at: now,
            expires_at: now.saturating_add(ttl),
        };
        self.storage
            .update(
                &session_path(&session.sid),
                Entry::new(to_json(&session)?),
                Some(Duration::from_secs(settings.token_ttl)),
            )
            .await?;

        let claims = Claims {
            sid: session.sid.clone(),
            sub: session.sub.clone(),
            iat: session.created_at,
            exp: session.expires_at,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(settings.secret_key.as_bytes()),
        )
        .map_err(|e| EngineError::Internal {
            reason: format!("failed to sign token: {e}"),
        })?;

        info!(login = %session.sub, sid = %session.sid, "session created");
        Ok(LogicalResponse::ok(json!({ "token": token })))
    }

    /// Current settings, failing if the engine is disabled.
    async fn params(&self) -> Result<LogopassParams, EngineError> {
        self.params
            .read()
            .await
            .clone()
            .ok_or_else(|| EngineError::NotEnabled {
                path: LOGOPASS_PATH.to_owned(),
            })
    }

    async fn load_params(&self) -> Result<Option<LogopassParams>, EngineError> {
        match self.storage.get_ok(PARAMS).await? {
            Some(entry) => Ok(Some(from_json(&entry.value)?)),
            None => Ok(None),
        }
    }

    /// Whether `token` is a valid JWT for a live session.
    async fn session_is_live(&self, token: &str, secret: &str) -> Result<bool, EngineError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let claims = match jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        ) {
            Ok(data) => data.claims,
            Err(e) => {
                debug!(error = %e, "bearer token rejected");
                return Ok(false);
            }
        };

        let Some(entry) = self.storage.get_ok(&session_path(&claims.sid)).await? else {
            debug!(sid = %claims.sid, "session not found");
            return Ok(false);
        };
        let session = from_json::<Session>(&entry.value)?;
        if session.expires_at <= Utc::now().timestamp() {
            debug!(sid = %claims.sid, "session expired");
            return Ok(false);
        }
        Ok(true)
    }
}

#[async_trait::async_trait]
impl Authorizer for LogopassEngine {
    async fn authorize(&self, req: &LogicalRequest) -> Result<bool, EngineError> {
        if is_open_route(req) {
            return Ok(true);
        }

        let Some(params) = self.state.params.read().await.clone() else {
            return Ok(false);
        };
        let Some(token) = req.header("authorization").and_then(bearer_token) else {
            return Ok(false);
        };
        self.state.session_is_live(token, &params.secret_key).await
    }
}

#[async_trait::async_trait]
impl Engine for LogopassEngine {
    fn root_path(&self) -> &str {
        LOGOPASS_PATH
    }

    fn help(&self) -> &str {
        "Logopass auth engine, authenticates users by login and password"
    }

    fn paths(&self) -> Vec<Route> {
        vec![
            self.route(Method::Get, LOGOPASS_PATH.to_owned(), LogopassState::show_params)
                .describe("Show the engine settings"),
            self.route(Method::Post, register_path(), LogopassState::register)
                .describe("Register a new user")
                .body::<Credentials>(),
            self.route(Method::Post, login_path(), LogopassState::login)
                .describe("Log in by login and password")
                .body::<Credentials>(),
        ]
    }

    async fn enable(&self, req: &LogicalRequest) -> Result<LogicalResponse, EngineError> {
        let mut current = self.state.params.write().await;
        if current.is_some() {
            return Ok(LogicalResponse::message(304, "logopass: already enabled"));
        }

        let Ok(mut params) = serde_json::from_slice::<LogopassParams>(&req.body) else {
            return Ok(LogicalResponse::bad_request("body is invalid or empty"));
        };
        if params.token_ttl == 0 {
            return Ok(LogicalResponse::bad_request("token_ttl must be positive"));
        }
        if params.secret_key.is_empty() {
            params.secret_key = BASE64.encode(EncryptionKey::generate().as_bytes());
        }

        self.state
            .storage
            .update(PARAMS, Entry::new(to_json(&params)?), None)
            .await?;
        info!(path = LOGOPASS_PATH, token_ttl = params.token_ttl, "logopass engine enabled");
        *current = Some(params);

        Ok(LogicalResponse::message(200, "logopass enabled"))
    }

    async fn post_unseal(&self) -> Result<(), EngineError> {
        let mut current = self.state.params.write().await;
        let Some(params) = self.state.load_params().await? else {
            return Err(EngineError::NotEnabled {
                path: LOGOPASS_PATH.to_owned(),
            });
        };
        *current = Some(params);
        Ok(())
    }

    fn as_authorizer(&self) -> Option<&dyn Authorizer> {
        Some(self)
    }
}

impl std::fmt::Debug for LogopassEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogopassEngine")
            .field("storage", &self.state.storage)
            .finish_non_exhaustive()
    }
}

fn register_path() -> String {
    format!("{LOGOPASS_PATH}/register")
}

fn login_path() -> String {
    format!("{LOGOPASS_PATH}/login")
}

fn user_path(login: &str) -> String {
    format!("{USERS}/{login}")
}

fn session_path(sid: &str) -> String {
    format!("{SESSIONS}/{sid}")
}

/// Register and login need no token.
fn is_open_route(req: &LogicalRequest) -> bool {
    let path = req.path.trim_end_matches('/');
    req.method == Method::Post && (path == register_path() || path == login_path())
}

/// The token of an `Authorization: Bearer <token>` header.
fn bearer_token(header: &str) -> Option<&str> {
    let mut parts = header.split_whitespace();
    parts.find(|part| *part == "Bearer")?;
    parts.next()
}

fn invalid_credentials() -> LogicalResponse {
    LogicalResponse::error(401, "invalid credentials")
}

async fn hash_password(password: String) -> Result<String, EngineError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
    })
    .await
    .map_err(|e| EngineError::Internal {
        reason: e.to_string(),
    })?
    .map_err(|e| EngineError::Internal {
        reason: format!("failed to hash password: {e}"),
    })
}

async fn verify_password(password: String, hash: String) -> Result<bool, EngineError> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash).map_err(|e| EngineError::Internal {
            reason: format!("stored password hash is malformed: {e}"),
        })?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|e| EngineError::Internal {
        reason: e.to_string(),
    })?
}

fn to_json<T: Serialize>(value: &T) -> Result<String, EngineError> {
    serde_json::to_string(value).map_err(|e| EngineError::Internal {
        reason: e.to_string(),
    })
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, EngineError> {
    serde_json::from_str(raw).map_err(|e| EngineError::Internal {
        reason: format!("corrupted logopass record: {e}"),
    })
}
