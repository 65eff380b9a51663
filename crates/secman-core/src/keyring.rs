//! Versioned data keys.
//!
//! The keyring owns every data key ever generated, keyed by a monotonically
//! increasing id, plus the root key that wraps them at rest. Exactly one key
//! is [`KeyStatus::Active`] at any time: the one with the highest id. Older
//! keys are kept forever so ciphertext written before a rotation stays
//! readable.
//!
//! Key creation is two-phase. [`Keyring::generate_key`] produces a
//! [`PendingKey`] without touching shared state; [`Keyring::commit`] installs
//! it. A caller can therefore prepare (and persist) a key and drop it on
//! failure without the keyring ever having seen it.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::crypto::EncryptionKey;
use crate::error::KeyringError;

/// Id reserved for the root key in envelopes that wrap keyring entries.
pub const ROOT_KEY_ID: u32 = 0;

/// Whether a key is used for new writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    /// Used to encrypt new writes.
    Active,
    /// Only used to decrypt existing ciphertext.
    Inactive,
}

/// A versioned data key.
#[derive(Debug, Clone)]
pub struct Key {
    /// Monotonic key id, embedded in every envelope sealed with this key.
    pub id: u32,
    /// Raw AES-256 key material.
    pub raw: EncryptionKey,
    /// Active or inactive.
    pub status: KeyStatus,
}

/// A freshly generated key that has not been installed yet.
///
/// Dropping it discards the key material.
#[derive(Debug)]
#[must_use = "a pending key has no effect until it is committed"]
pub struct PendingKey {
    key: Key,
}

impl PendingKey {
    /// The id the key will take once committed.
    pub fn id(&self) -> u32 {
        self.key.id
    }

    /// The key material.
    pub fn raw(&self) -> &EncryptionKey {
        &self.key.raw
    }
}

#[derive(Default)]
struct Inner {
    keys: BTreeMap<u32, Key>,
    root: Option<EncryptionKey>,
    active: Option<u32>,
}

impl Inner {
    /// Mark the highest id active and every other key inactive.
    fn recompute_active(&mut self) {
        let highest = self.keys.keys().next_back().copied();
        for key in self.keys.values_mut() {
            key.status = if Some(key.id) == highest {
                KeyStatus::Active
            } else {
                KeyStatus::Inactive
            };
        }
        self.active = highest;
    }
}

/// Thread-safe set of versioned data keys.
///
/// Mutations take the exclusive lock, lookups the shared one. No method
/// blocks on I/O.
#[derive(Default)]
pub struct Keyring {
    inner: RwLock<Inner>,
}

impl Keyring {
    /// Create an empty keyring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare the next data key without installing it.
    ///
    /// The id is one above the highest id currently known. Concurrent callers
    /// can receive the same id, so rotations must be serialized by the owner.
    pub fn generate_key(&self) -> PendingKey {
        let next = self
            .inner
            .read()
            .keys
            .keys()
            .next_back()
            .map_or(ROOT_KEY_ID.saturating_add(1), |id| id.saturating_add(1));
        PendingKey {
            key: Key {
                id: next,
                raw: EncryptionKey::generate(),
                status: KeyStatus::Active,
            },
        }
    }

    /// Install a pending key. It becomes the active key if its id is the
    /// highest; any previously active key turns inactive.
    pub fn commit(&self, pending: PendingKey) -> Key {
        let key = pending.key;
        let mut inner = self.inner.write();
        inner.keys.insert(key.id, key.clone());
        inner.recompute_active();
        inner.keys.get(&key.id).cloned().unwrap_or(key)
    }

    /// Insert (or overwrite) the key at `id` from raw material.
    ///
    /// # Errors
    ///
    /// - [`KeyringError::ReservedId`] if `id` is the root key id.
    /// - [`KeyringError::InvalidKey`] if `raw` is not a 256-bit key.
    pub fn add_key(&self, raw: &[u8], id: u32) -> Result<Key, KeyringError> {
        if id == ROOT_KEY_ID {
            return Err(KeyringError::ReservedId { id });
        }
        let raw = EncryptionKey::from_slice(raw)
            .map_err(|source| KeyringError::InvalidKey { id, source })?;

        let mut inner = self.inner.write();
        inner.keys.insert(
            id,
            Key {
                id,
                raw,
                status: KeyStatus::Inactive,
            },
        );
        inner.recompute_active();
        inner
            .keys
            .get(&id)
            .cloned()
            .ok_or(KeyringError::UnknownKey { id })
    }

    /// Look up a key by id.
    #[must_use]
    pub fn get_key(&self, id: u32) -> Option<Key> {
        self.inner.read().keys.get(&id).cloned()
    }

    /// Id of the active key, if any key is installed.
    #[must_use]
    pub fn actual_id(&self) -> Option<u32> {
        self.inner.read().active
    }

    /// The key new writes are encrypted with.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::NoActiveKey`] if the keyring is empty.
    pub fn active_key(&self) -> Result<Key, KeyringError> {
        let inner = self.inner.read();
        inner
            .active
            .and_then(|id| inner.keys.get(&id).cloned())
            .ok_or(KeyringError::NoActiveKey)
    }

    /// Install the root key used to wrap keyring entries at rest.
    pub fn set_root_key(&self, key: EncryptionKey) {
        self.inner.write().root = Some(key);
    }

    /// The root key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::NoRootKey`] before unseal.
    pub fn root_key(&self) -> Result<EncryptionKey, KeyringError> {
        self.inner.read().root.clone().ok_or(KeyringError::NoRootKey)
    }

    /// Number of data keys held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().keys.len()
    }

    /// Whether no data key has been installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().keys.is_empty()
    }
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Keyring")
            .field("keys", &inner.keys.len())
            .field("active", &inner.active)
            .field("root", &inner.root.is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn generate_does_not_install() {
        let keyring = Keyring::new();
        let pending = keyring.generate_key();
        assert_eq!(pending.id(), 1);
        assert!(keyring.is_empty());
        assert_eq!(keyring.actual_id(), None);
        assert!(keyring.get_key(1).is_none());
    }

    #[test]
    fn commit_installs_and_activates() {
        let keyring = Keyring::new();
        let key = keyring.commit(keyring.generate_key());
        assert_eq!(key.id, 1);
        assert_eq!(key.status, KeyStatus::Active);
        assert_eq!(keyring.actual_id(), Some(1));
    }

    #[test]
    fn rotation_deactivates_previous_key() {
        let keyring = Keyring::new();
        keyring.commit(keyring.generate_key());
        let second = keyring.commit(keyring.generate_key());

        assert_eq!(second.id, 2);
        assert_eq!(keyring.actual_id(), Some(2));
        assert_eq!(keyring.get_key(1).unwrap().status, KeyStatus::Inactive);
        assert_eq!(keyring.get_key(2).unwrap().status, KeyStatus::Active);
        assert_eq!(keyring.len(), 2);
    }

    #[test]
    fn add_key_out_of_order_keeps_highest_active() {
        let keyring = Keyring::new();
        keyring.add_key(&[3u8; 32], 3).unwrap();
        keyring.add_key(&[1u8; 32], 1).unwrap();

        assert_eq!(keyring.actual_id(), Some(3));
        assert_eq!(keyring.get_key(1).unwrap().status, KeyStatus::Inactive);
        assert_eq!(keyring.active_key().unwrap().raw.as_bytes(), &[3u8; 32]);
    }

    #[test]
    fn add_key_overwrites_existing_id() {
        let keyring = Keyring::new();
        keyring.add_key(&[1u8; 32], 1).unwrap();
        keyring.add_key(&[2u8; 32], 1).unwrap();
        assert_eq!(keyring.len(), 1);
        assert_eq!(keyring.get_key(1).unwrap().raw.as_bytes(), &[2u8; 32]);
    }

    #[test]
    fn add_key_rejects_root_id_and_bad_length() {
        let keyring = Keyring::new();
        assert!(matches!(
            keyring.add_key(&[0u8; 32], ROOT_KEY_ID).unwrap_err(),
            KeyringError::ReservedId { id: 0 }
        ));
        assert!(matches!(
            keyring.add_key(&[0u8; 8], 1).unwrap_err(),
            KeyringError::InvalidKey { id: 1, .. }
        ));
        assert!(keyring.is_empty());
    }

    #[test]
    fn empty_keyring_has_no_active_or_root_key() {
        let keyring = Keyring::new();
        assert!(matches!(
            keyring.active_key().unwrap_err(),
            KeyringError::NoActiveKey
        ));
        assert!(matches!(
            keyring.root_key().unwrap_err(),
            KeyringError::NoRootKey
        ));
    }

    #[test]
    fn generate_continues_after_loaded_keys() {
        let keyring = Keyring::new();
        keyring.add_key(&[9u8; 32], 5).unwrap();
        assert_eq!(keyring.generate_key().id(), 6);
    }
}
