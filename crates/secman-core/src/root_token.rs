//! Root token.
//!
//! The root token is minted once at init and bypasses the auth chain. Only
//! its SHA-256 hash is stored, in plaintext storage next to the seal config,
//! so it can be checked while the barrier is still sealed (unseal itself
//! requires it).

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::info;

use crate::barrier::Barrier;
use crate::crypto::EncryptionKey;
use crate::error::BarrierError;

/// Raw storage path of the root token hash.
pub const ROOT_TOKEN_PATH: &str = "sys/root_token";

/// Request header carrying the root token.
pub const ROOT_TOKEN_HEADER: &str = "x-secman-token";

/// Creates and verifies the root token.
#[derive(Debug, Clone)]
pub struct RootTokens {
    barrier: Arc<Barrier>,
}

impl RootTokens {
    #[must_use]
    pub fn new(barrier: Arc<Barrier>) -> Self {
        Self { barrier }
    }

    /// Mint a new root token, replacing any previous one. The token itself is
    /// returned once and never stored.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Storage`] if the hash cannot be written.
    pub async fn create(&self) -> Result<String, BarrierError> {
        let token = BASE64.encode(EncryptionKey::generate().as_bytes());
        self.barrier
            .put_raw(ROOT_TOKEN_PATH, hash(&token).into_bytes())
            .await?;
        info!("root token created");
        Ok(token)
    }

    /// Whether `token` is the root token. Comparison is constant-time.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Storage`] if the stored hash cannot be read.
    pub async fn verify(&self, token: &str) -> Result<bool, BarrierError> {
        let Some(stored) = self.barrier.get_raw(ROOT_TOKEN_PATH).await? else {
            return Ok(false);
        };
        let presented = hash(token);
        Ok(bool::from(presented.as_bytes().ct_eq(&stored)))
    }
}

fn hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
