//! Encryption barrier for `secman`.
//!
//! The barrier is the gate between plaintext entries and physical storage:
//! every value written through it is sealed under the keyring's active key
//! and every value read is opened with whichever key its envelope names.
//! Storage only ever sees ciphertext.
//!
//! The barrier starts sealed and refuses every data operation until a quorum
//! of unseal shares has been submitted. Unsealing is one-way for the life of
//! the barrier.
//!
//! # Key layout
//!
//! - At init a random root key is split with Shamir's scheme into
//!   `shares` parts, `threshold` of which reconstruct it. Shares are
//!   returned once and never stored.
//! - Data keys are stored at `sys/keyring/<id>`, each wrapped by the root key
//!   (envelope key id `0`). A reconstructed root key is only accepted once it
//!   opens every keyring entry.
//! - The seal config is stored in plaintext at `sys/seal/config`; its
//!   presence marks the barrier as initialized.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use secman_storage::{PhysicalEntry, StorageBackend, StorageError};
use serde::{Deserialize, Serialize};
use sharks::{Share, Sharks};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::crypto::{self, EncryptionKey};
use crate::error::BarrierError;
use crate::keyring::{Keyring, ROOT_KEY_ID};
use crate::quorum::QuorumBuffer;

/// Prefix under which wrapped data keys are stored.
pub const KEYRING_PREFIX: &str = "sys/keyring/";

/// Storage path of the plaintext seal configuration.
pub const SEAL_CONFIG_PATH: &str = "sys/seal/config";

/// Maximum number of unseal shares.
const MAX_SHARES: u8 = 10;

/// Share count and unseal threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealConfig {
    /// Total number of unseal shares handed out at init.
    pub shares: u8,
    /// Shares required to unseal.
    pub threshold: u8,
}

impl Default for SealConfig {
    fn default() -> Self {
        Self {
            shares: 5,
            threshold: 3,
        }
    }
}

impl SealConfig {
    /// Build a validated config.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::InvalidConfig`] unless `1 <= threshold <= shares <= 10`.
    pub fn new(shares: u8, threshold: u8) -> Result<Self, BarrierError> {
        let config = Self { shares, threshold };
        config.validate()?;
        Ok(config)
    }

    /// Check the share count and threshold bounds.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::InvalidConfig`] if a bound is violated.
    pub fn validate(&self) -> Result<(), BarrierError> {
        if !(1..=MAX_SHARES).contains(&self.shares) {
            return Err(BarrierError::InvalidConfig {
                reason: format!("share count must be 1-{MAX_SHARES}, got {}", self.shares),
            });
        }
        if self.threshold == 0 {
            return Err(BarrierError::InvalidConfig {
                reason: "threshold must be at least 1".to_owned(),
            });
        }
        if self.threshold > self.shares {
            return Err(BarrierError::InvalidConfig {
                reason: format!(
                    "threshold ({}) cannot exceed share count ({})",
                    self.threshold, self.shares
                ),
            });
        }
        Ok(())
    }
}

/// A plaintext value as engines see it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Key relative to the storage view that returned the entry.
    pub key: String,
    /// Full physical path.
    pub path: String,
    /// Plaintext value.
    pub value: String,
}

impl Entry {
    /// An entry carrying only a value, ready to be written.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }
}

/// Plaintext storage behind the barrier.
///
/// Implemented by [`Barrier`] and by
/// [`LogicalStorage`](crate::logical_storage::LogicalStorage), which prefixes
/// every path. Dropping a returned future abandons the underlying I/O.
#[async_trait::async_trait]
pub trait BarrierStorage: Send + Sync {
    /// Read and decrypt the entry at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::NotFound`] on a miss, [`BarrierError::Sealed`]
    /// while sealed, and other variants for storage or crypto failures.
    async fn get(&self, path: &str) -> Result<Entry, BarrierError>;

    /// Like [`get`](Self::get), but a miss is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Every error except not-found propagates.
    async fn get_ok(&self, path: &str) -> Result<Option<Entry>, BarrierError> {
        match self.get(path).await {
            Ok(entry) => Ok(Some(entry)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Encrypt and write `entry.value` at `path`. `ttl` is handed to physical
    /// storage; `None` or zero keeps the entry forever.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Sealed`] while sealed, or a storage/crypto error.
    async fn update(
        &self,
        path: &str,
        entry: Entry,
        ttl: Option<Duration>,
    ) -> Result<(), BarrierError>;

    /// Delete the entry at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Sealed`] while sealed, or a storage error.
    async fn delete(&self, path: &str) -> Result<(), BarrierError>;

    /// Read and decrypt every entry under `path`.
    ///
    /// # Errors
    ///
    /// Any entry that cannot be decrypted fails the whole call.
    async fn list(&self, path: &str) -> Result<Vec<Entry>, BarrierError>;
}

/// The encryption barrier wrapping a storage backend.
pub struct Barrier {
    storage: Arc<dyn StorageBackend>,
    keyring: Keyring,
    sealed: AtomicBool,
    config: SealConfig,
    quorum: parking_lot::RwLock<QuorumBuffer>,
    /// Serializes init, unseal attempts and rotation.
    lifecycle: Mutex<()>,
}

impl Barrier {
    /// Create a sealed barrier over `storage`. `config` is used by
    /// [`init`](Self::init); an already initialized store keeps its own.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::InvalidConfig`] if `config` is out of bounds.
    pub fn new(storage: Arc<dyn StorageBackend>, config: SealConfig) -> Result<Self, BarrierError> {
        config.validate()?;
        Ok(Self {
            storage,
            keyring: Keyring::new(),
            sealed: AtomicBool::new(true),
            config,
            quorum: parking_lot::RwLock::new(QuorumBuffer::new(usize::from(config.threshold))),
            lifecycle: Mutex::new(()),
        })
    }

    /// Whether data operations are currently refused.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Whether [`init`](Self::init) has run against this storage.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Storage`] if the backend fails.
    pub async fn is_initialized(&self) -> Result<bool, BarrierError> {
        Ok(self.get_raw(SEAL_CONFIG_PATH).await?.is_some())
    }

    /// First-time setup. Returns the raw unseal shares, exactly once.
    ///
    /// Leaves the barrier sealed.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::AlreadyInitialized`] if the store is initialized.
    /// - [`BarrierError::Crypto`] or [`BarrierError::Storage`] on failure.
    pub async fn init(&self) -> Result<Vec<Vec<u8>>, BarrierError> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.is_initialized().await? {
            return Err(BarrierError::AlreadyInitialized);
        }

        let root_key = EncryptionKey::generate();
        let first = self.keyring.generate_key();
        let wrapped = wrap_key(&root_key, first.id(), first.raw())?;
        self.put_raw(&keyring_path(first.id()), wrapped).await?;

        let config = serde_json::to_vec(&self.config).map_err(|e| BarrierError::Malformed {
            path: SEAL_CONFIG_PATH.to_owned(),
            reason: e.to_string(),
        })?;
        // Written last: a failed init leaves the store uninitialized.
        self.put_raw(SEAL_CONFIG_PATH, config).await?;

        let shares: Vec<Vec<u8>> = Sharks(self.config.threshold)
            .dealer(root_key.as_bytes())
            .take(usize::from(self.config.shares))
            .map(|share| Vec::from(&share))
            .collect();

        info!(
            shares = self.config.shares,
            threshold = self.config.threshold,
            "barrier initialized"
        );
        Ok(shares)
    }

    /// Submit one unseal share.
    ///
    /// Returns `Ok(false)` while more shares are needed and `Ok(true)` once
    /// the quorum unsealed the barrier. When the quorum is complete but does
    /// not reconstruct a valid root key, the collected shares are discarded
    /// and an error is returned; the next attempt starts from zero.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::AlreadyUnsealed`] if the barrier is unsealed.
    /// - [`BarrierError::NotInitialized`] if init never ran.
    /// - [`BarrierError::InvalidShare`] or [`BarrierError::RecoveryFailed`]
    ///   when the completed quorum is bad.
    pub async fn unseal(&self, share: &[u8]) -> Result<bool, BarrierError> {
        let _lifecycle = self.lifecycle.lock().await;

        if !self.is_sealed() {
            return Err(BarrierError::AlreadyUnsealed);
        }
        let config = self.load_config().await?;

        let shares = {
            let mut quorum = self.quorum.write();
            if quorum.threshold() != usize::from(config.threshold) {
                *quorum = QuorumBuffer::new(usize::from(config.threshold));
            }
            if !quorum.add(share.to_vec()) {
                debug!(progress = %quorum.info(), "unseal share accepted");
                return Ok(false);
            }
            let shares = Zeroizing::new(quorum.shares().to_vec());
            quorum.clear();
            shares
        };

        let (root_key, keys) = match self.open_keyring(config, &shares).await {
            Ok(opened) => opened,
            Err(e) => {
                warn!(error = %e, "unseal attempt failed, share buffer cleared");
                return Err(e);
            }
        };

        for (id, raw) in &keys {
            self.keyring.add_key(raw.as_slice(), *id)?;
        }
        self.keyring.set_root_key(root_key);
        self.sealed.store(false, Ordering::Release);

        info!(keys = keys.len(), "barrier unsealed");
        Ok(true)
    }

    /// Operator-facing unseal progress, e.g. `AES256 SSS keys: 2/3`.
    #[must_use]
    pub fn info(&self) -> String {
        format!("AES256 SSS keys: {}", self.quorum.read().info())
    }

    /// `(submitted, threshold)` of the current unseal attempt.
    #[must_use]
    pub fn progress(&self) -> (usize, usize) {
        let quorum = self.quorum.read();
        (quorum.len(), quorum.threshold())
    }

    /// Generate, persist and activate a new data key. Existing ciphertext
    /// stays readable under the key it was written with.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Sealed`] while sealed, or a storage error if
    /// the wrapped key cannot be persisted (the keyring is left unchanged).
    pub async fn rotate(&self) -> Result<u32, BarrierError> {
        self.ensure_unsealed()?;
        let _lifecycle = self.lifecycle.lock().await;

        let root_key = self.keyring.root_key()?;
        let pending = self.keyring.generate_key();
        let wrapped = wrap_key(&root_key, pending.id(), pending.raw())?;
        self.put_raw(&keyring_path(pending.id()), wrapped).await?;

        let key = self.keyring.commit(pending);
        info!(key_id = key.id, "data key rotated");
        Ok(key.id)
    }

    /// Id of the key new writes are sealed with.
    #[must_use]
    pub fn active_key_id(&self) -> Option<u32> {
        self.keyring.actual_id()
    }

    /// Write raw bytes to storage WITHOUT encryption.
    ///
    /// Only for bootstrap records that must be readable while sealed (seal
    /// config, wrapped keys, root token hash). Works while sealed.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Storage`] if the backend fails.
    pub async fn put_raw(&self, path: &str, value: Vec<u8>) -> Result<(), BarrierError> {
        self.storage
            .update(path, PhysicalEntry::new(path, value), None)
            .await
            .map_err(|source| storage_error("put_raw", path, source))
    }

    /// Read raw bytes from storage WITHOUT decryption. A miss is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Storage`] if the backend fails.
    pub async fn get_raw(&self, path: &str) -> Result<Option<Vec<u8>>, BarrierError> {
        match self.storage.get(path).await {
            Ok(entry) => Ok(Some(entry.value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(source) => Err(storage_error("get_raw", path, source)),
        }
    }

    fn ensure_unsealed(&self) -> Result<(), BarrierError> {
        if self.is_sealed() {
            return Err(BarrierError::Sealed);
        }
        Ok(())
    }

    async fn load_config(&self) -> Result<SealConfig, BarrierError> {
        let raw = self
            .get_raw(SEAL_CONFIG_PATH)
            .await?
            .ok_or(BarrierError::NotInitialized)?;
        let config: SealConfig =
            serde_json::from_slice(&raw).map_err(|e| BarrierError::Malformed {
                path: SEAL_CONFIG_PATH.to_owned(),
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reconstruct the root key from a full quorum and unwrap every stored
    /// data key with it. Touches no shared state.
    async fn open_keyring(
        &self,
        config: SealConfig,
        shares: &[Vec<u8>],
    ) -> Result<(EncryptionKey, Vec<(u32, Zeroizing<Vec<u8>>)>), BarrierError> {
        let parsed = shares
            .iter()
            .map(|bytes| {
                Share::try_from(bytes.as_slice()).map_err(|e| BarrierError::InvalidShare {
                    reason: format!("share deserialization failed: {e}"),
                })
            })
            .collect::<Result<Vec<Share>, _>>()?;

        let recovered = Zeroizing::new(Sharks(config.threshold).recover(&parsed).map_err(|e| {
            BarrierError::RecoveryFailed {
                reason: e.to_string(),
            }
        })?);
        let root_key =
            EncryptionKey::from_slice(&recovered).map_err(|e| BarrierError::RecoveryFailed {
                reason: e.to_string(),
            })?;

        let stored = self
            .storage
            .list(KEYRING_PREFIX)
            .await
            .map_err(|source| storage_error("list", KEYRING_PREFIX, source))?;
        if stored.is_empty() {
            return Err(BarrierError::NotInitialized);
        }

        let mut keys = Vec::with_capacity(stored.len());
        for entry in stored {
            let (id, raw) = unwrap_key(&root_key, &entry.value).map_err(|_| {
                BarrierError::RecoveryFailed {
                    reason: format!("reconstructed root key does not open '{}'", entry.path),
                }
            })?;
            if keyring_path(id) != entry.path {
                return Err(BarrierError::Malformed {
                    path: entry.path,
                    reason: format!("wrapped key carries id {id}"),
                });
            }
            keys.push((id, raw));
        }
        Ok((root_key, keys))
    }

    fn decrypt(&self, path: &str, envelope: &[u8]) -> Result<Entry, BarrierError> {
        let id = crypto::key_id(envelope).map_err(|source| BarrierError::Crypto {
            path: path.to_owned(),
            source,
        })?;
        let key = self
            .keyring
            .get_key(id)
            .ok_or_else(|| BarrierError::UnknownKey {
                path: path.to_owned(),
                id,
            })?;
        let plaintext = crypto::open(&key.raw, envelope).map_err(|source| BarrierError::Crypto {
            path: path.to_owned(),
            source,
        })?;
        let value = String::from_utf8(plaintext).map_err(|e| BarrierError::Malformed {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Entry {
            key: path.to_owned(),
            path: path.to_owned(),
            value,
        })
    }
}

#[async_trait::async_trait]
impl BarrierStorage for Barrier {
    async fn get(&self, path: &str) -> Result<Entry, BarrierError> {
        self.ensure_unsealed()?;
        let physical = self.storage.get(path).await.map_err(|source| {
            if source.is_not_found() {
                BarrierError::NotFound {
                    path: path.to_owned(),
                }
            } else {
                storage_error("get", path, source)
            }
        })?;
        self.decrypt(path, &physical.value)
    }

    async fn update(
        &self,
        path: &str,
        entry: Entry,
        ttl: Option<Duration>,
    ) -> Result<(), BarrierError> {
        self.ensure_unsealed()?;
        let key = self.keyring.active_key()?;
        let envelope =
            crypto::seal(key.id, &key.raw, entry.value.as_bytes()).map_err(|source| {
                BarrierError::Crypto {
                    path: path.to_owned(),
                    source,
                }
            })?;
        self.storage
            .update(path, PhysicalEntry::new(path, envelope), ttl)
            .await
            .map_err(|source| storage_error("update", path, source))
    }

    async fn delete(&self, path: &str) -> Result<(), BarrierError> {
        self.ensure_unsealed()?;
        self.storage
            .delete(path)
            .await
            .map_err(|source| storage_error("delete", path, source))
    }

    async fn list(&self, path: &str) -> Result<Vec<Entry>, BarrierError> {
        self.ensure_unsealed()?;
        let physical = self
            .storage
            .list(path)
            .await
            .map_err(|source| storage_error("list", path, source))?;
        physical
            .iter()
            .map(|entry| self.decrypt(&entry.path, &entry.value))
            .collect()
    }
}

impl std::fmt::Debug for Barrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Barrier")
            .field("sealed", &self.is_sealed())
            .field("config", &self.config)
            .field("keyring", &self.keyring)
            .finish_non_exhaustive()
    }
}

fn keyring_path(id: u32) -> String {
    format!("{KEYRING_PREFIX}{id}")
}

fn storage_error(op: &'static str, path: &str, source: StorageError) -> BarrierError {
    BarrierError::Storage {
        op,
        path: path.to_owned(),
        source,
    }
}

/// Seal `[id || raw]` under the root key.
fn wrap_key(root: &EncryptionKey, id: u32, raw: &EncryptionKey) -> Result<Vec<u8>, BarrierError> {
    let mut plaintext = Zeroizing::new(Vec::with_capacity(36));
    plaintext.extend_from_slice(&id.to_be_bytes());
    plaintext.extend_from_slice(raw.as_bytes());
    crypto::seal(ROOT_KEY_ID, root, &plaintext).map_err(|source| BarrierError::Crypto {
        path: keyring_path(id),
        source,
    })
}

fn unwrap_key(
    root: &EncryptionKey,
    envelope: &[u8],
) -> Result<(u32, Zeroizing<Vec<u8>>), BarrierError> {
    let plaintext = Zeroizing::new(crypto::open(root, envelope).map_err(|source| {
        BarrierError::Crypto {
            path: KEYRING_PREFIX.to_owned(),
            source,
        }
    })?);
    let Some((id, raw)) = plaintext.split_first_chunk::<4>() else {
        return Err(BarrierError::Malformed {
            path: KEYRING_PREFIX.to_owned(),
            reason: "wrapped key too short".to_owned(),
        });
    };
    Ok((u32::from_be_bytes(*id), Zeroizing::new(raw.to_vec())))
}
