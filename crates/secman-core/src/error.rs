//! Error types for `secman-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Crypto errors never include key material, only key identifiers
//! or operation descriptions.

use secman_storage::StorageError;

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// AES-256-GCM decryption failed (wrong key, corrupted ciphertext, or tampered tag).
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },

    /// Envelope is too short to contain a key id, nonce and tag.
    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    CiphertextTooShort { expected: usize, actual: usize },

    /// Raw key material has the wrong length.
    #[error("invalid key length: expected 32 bytes, got {actual}")]
    InvalidKeyLength { actual: usize },
}

/// Errors from keyring operations.
#[derive(Debug, thiserror::Error)]
pub enum KeyringError {
    /// Ciphertext references a key id the keyring does not hold.
    #[error("unknown key id {id}")]
    UnknownKey { id: u32 },

    /// No data key has been installed yet.
    #[error("keyring has no active key")]
    NoActiveKey,

    /// Key id `0` belongs to the root key and cannot hold a data key.
    #[error("key id {id} is reserved")]
    ReservedId { id: u32 },

    /// Raw key material passed to `add_key` is not a 256-bit key.
    #[error("invalid key material for id {id}: {source}")]
    InvalidKey {
        id: u32,
        #[source]
        source: CryptoError,
    },

    /// The root key is required but has not been set.
    #[error("root key is not set")]
    NoRootKey,
}

/// Errors from the encryption barrier.
#[derive(Debug, thiserror::Error)]
pub enum BarrierError {
    /// The barrier is sealed. No data operation is possible until unseal.
    #[error("barrier is sealed")]
    Sealed,

    /// Nothing is stored at the path.
    #[error("entry not found at '{path}'")]
    NotFound { path: String },

    /// The barrier has already been initialized.
    #[error("barrier is already initialized")]
    AlreadyInitialized,

    /// The barrier has not been initialized yet.
    #[error("barrier is not initialized")]
    NotInitialized,

    /// The barrier is already unsealed.
    #[error("barrier is already unsealed")]
    AlreadyUnsealed,

    /// Invalid share count or threshold.
    #[error("invalid seal config: {reason}")]
    InvalidConfig { reason: String },

    /// A submitted share was malformed.
    #[error("invalid unseal share: {reason}")]
    InvalidShare { reason: String },

    /// The collected quorum did not reconstruct a key that opens the keyring.
    #[error("unseal failed: {reason}")]
    RecoveryFailed { reason: String },

    /// Ciphertext references a key that is not in the keyring.
    #[error("cannot decrypt '{path}': unknown key id {id}")]
    UnknownKey { path: String, id: u32 },

    /// A cryptographic operation within the barrier failed.
    #[error("barrier crypto error at '{path}': {source}")]
    Crypto {
        path: String,
        #[source]
        source: CryptoError,
    },

    /// The keyring rejected an operation.
    #[error("barrier keyring error: {0}")]
    Keyring(#[from] KeyringError),

    /// The physical storage returned an error.
    #[error("barrier {op} '{path}' failed: {source}")]
    Storage {
        op: &'static str,
        path: String,
        #[source]
        source: StorageError,
    },

    /// A logical path tried to leave its namespace.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// A decrypted value was not valid UTF-8 or a bootstrap record was malformed.
    #[error("malformed record at '{path}': {reason}")]
    Malformed { path: String, reason: String },
}

impl BarrierError {
    /// Whether this is the [`BarrierError::NotFound`] sentinel.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the operation was refused because the barrier is sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        matches!(self, Self::Sealed)
    }
}

/// Errors from engine registration and request routing.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// An engine is already registered at exactly this root path.
    #[error("engine already registered at '{path}'")]
    EngineAlreadyRegistered { path: String },

    /// No registered engine owns the path.
    #[error("no engine registered for '{path}'")]
    EngineNotFound { path: String },

    /// A root path or route pattern is malformed.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// A route matched but captured a different number of values than it
    /// declares fields. The route table is wrong.
    #[error("route '{pattern}' declares {expected} fields but matched {actual}")]
    FieldCountMismatch {
        pattern: String,
        expected: usize,
        actual: usize,
    },
}

/// Errors raised by engines and their handlers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine has not been enabled. `post_unseal` fan-out skips engines
    /// returning this.
    #[error("engine '{path}' is not enabled")]
    NotEnabled { path: String },

    /// Invalid request to the engine.
    #[error("invalid engine request: {reason}")]
    InvalidRequest { reason: String },

    /// A handler asked for a request body the route did not decode.
    #[error("route has no body of the requested type")]
    MissingBody,

    /// The barrier returned an error.
    #[error("engine storage error: {0}")]
    Barrier(#[from] BarrierError),

    /// Routing inside the engine failed.
    #[error("engine routing error: {0}")]
    Router(#[from] RouterError),

    /// Internal engine error.
    #[error("engine internal error: {reason}")]
    Internal { reason: String },
}

impl EngineError {
    /// Whether this is the "engine not enabled" signal.
    #[must_use]
    pub fn is_not_enabled(&self) -> bool {
        matches!(self, Self::NotEnabled { .. })
    }
}

/// Errors from the authorization chain.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No chain member authorized the request.
    #[error("unauthorized")]
    Unauthorized,

    /// The engine does not provide an authorization capability.
    #[error("engine '{path}' cannot authorize requests")]
    NotAuthorizer { path: String },

    /// A chain member failed while authorizing.
    #[error("auth engine error: {0}")]
    Engine(#[from] EngineError),

    /// Resolving a persisted chain member failed.
    #[error("auth routing error: {0}")]
    Router(#[from] RouterError),

    /// Reading or writing the persisted chain failed.
    #[error("auth storage error: {0}")]
    Barrier(#[from] BarrierError),

    /// The persisted chain could not be (de)serialized.
    #[error("auth chain serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Errors surfaced by [`Core`](crate::core::Core) to the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A submitted share was not valid base64.
    #[error("invalid unseal share encoding: {reason}")]
    InvalidShareEncoding { reason: String },

    /// Barrier failure (sealed, not initialized, storage, crypto).
    #[error(transparent)]
    Barrier(#[from] BarrierError),

    /// Engine registration or routing failure.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// Engine failure.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Authorization failure.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl CoreError {
    /// Whether the operation failed only because the barrier is sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        match self {
            Self::Barrier(e) => e.is_sealed(),
            Self::Engine(EngineError::Barrier(e)) | Self::Auth(AuthError::Barrier(e)) => {
                e.is_sealed()
            }
            _ => false,
        }
    }
}
