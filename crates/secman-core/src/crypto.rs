//! Cryptographic primitives for `secman`.
//!
//! Provides AES-256-GCM authenticated encryption in a key-tagged envelope and
//! a zeroize-on-drop key newtype.
//!
//! # Envelope format
//!
//! `key_id (u32 BE) || nonce (12 bytes) || ciphertext || tag (16 bytes)`
//!
//! The key id travels with the ciphertext so decryption can find the right
//! (possibly rotated) key without external metadata. The id is bound to the
//! ciphertext as AEAD associated data, so it cannot be swapped.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Length of the key id prefix.
const KEY_ID_LEN: usize = 4;

/// Nonce length for AES-256-GCM (96 bits).
const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length.
const TAG_LEN: usize = 16;

/// Minimum envelope length: key id + nonce + tag.
pub const MIN_ENVELOPE_LEN: usize = KEY_ID_LEN + NONCE_LEN + TAG_LEN;

/// A 256-bit encryption key that is zeroized on drop.
///
/// The inner bytes are never exposed in `Debug` output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a key from a slice, checking its length.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] unless `bytes` is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                actual: bytes.len(),
            })?;
        Ok(Self(array))
    }

    /// Generate a new random key using the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&key);
        Self(bytes)
    }

    /// Borrow the raw key bytes.
    ///
    /// The caller must not log or persist these bytes unwrapped.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypt `plaintext` under `key`, tagging the envelope with `key_id`.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the AEAD operation fails.
pub fn seal(key_id: u32, key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let id = key_id.to_be_bytes();
    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: &id,
            },
        )
        .map_err(|e| CryptoError::Encryption {
            reason: e.to_string(),
        })?;

    let mut envelope =
        Vec::with_capacity(KEY_ID_LEN.saturating_add(NONCE_LEN).saturating_add(ciphertext.len()));
    envelope.extend_from_slice(&id);
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Read the key id an envelope was sealed with.
///
/// # Errors
///
/// Returns [`CryptoError::CiphertextTooShort`] if the envelope is truncated.
pub fn key_id(envelope: &[u8]) -> Result<u32, CryptoError> {
    if envelope.len() < MIN_ENVELOPE_LEN {
        return Err(CryptoError::CiphertextTooShort {
            expected: MIN_ENVELOPE_LEN,
            actual: envelope.len(),
        });
    }
    let Some((id, _)) = envelope.split_first_chunk::<KEY_ID_LEN>() else {
        return Err(CryptoError::CiphertextTooShort {
            expected: MIN_ENVELOPE_LEN,
            actual: envelope.len(),
        });
    };
    Ok(u32::from_be_bytes(*id))
}

/// Decrypt an envelope produced by [`seal`].
///
/// # Errors
///
/// Returns [`CryptoError::CiphertextTooShort`] for truncated input and
/// [`CryptoError::Decryption`] if authentication fails (wrong key,
/// corrupted data, or tampered tag).
pub fn open(key: &EncryptionKey, envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
    key_id(envelope)?;

    let (id, rest) = envelope.split_at(KEY_ID_LEN);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: id,
            },
        )
        .map_err(|e| CryptoError::Decryption {
            reason: e.to_string(),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = EncryptionKey::generate();
        let envelope = seal(7, &key, b"hunter2").unwrap();
        assert_eq!(key_id(&envelope).unwrap(), 7);
        assert_eq!(open(&key, &envelope).unwrap(), b"hunter2");
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let key = EncryptionKey::generate();
        let envelope = seal(1, &key, b"").unwrap();
        assert_eq!(envelope.len(), MIN_ENVELOPE_LEN);
        assert!(open(&key, &envelope).unwrap().is_empty());
    }

    #[test]
    fn same_plaintext_gets_fresh_nonce() {
        let key = EncryptionKey::generate();
        let a = seal(1, &key, b"same").unwrap();
        let b = seal(1, &key, b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let envelope = seal(1, &EncryptionKey::generate(), b"secret").unwrap();
        let err = open(&EncryptionKey::generate(), &envelope).unwrap_err();
        assert!(matches!(err, CryptoError::Decryption { .. }));
    }

    #[test]
    fn rewritten_key_id_fails_authentication() {
        let key = EncryptionKey::generate();
        let mut envelope = seal(1, &key, b"secret").unwrap();
        envelope[3] = 2;
        assert!(open(&key, &envelope).is_err());
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        let err = key_id(&[0u8; 10]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::CiphertextTooShort { expected: 32, actual: 10 }
        ));
    }

    #[test]
    fn key_from_slice_checks_length() {
        assert!(EncryptionKey::from_slice(&[1u8; 32]).is_ok());
        assert!(matches!(
            EncryptionKey::from_slice(&[1u8; 16]).unwrap_err(),
            CryptoError::InvalidKeyLength { actual: 16 }
        ));
    }

    #[test]
    fn debug_redacts_key_bytes() {
        let key = EncryptionKey::from_bytes([0xAB; 32]);
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("171"));
    }
}
