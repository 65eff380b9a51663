//! Expiry bookkeeping shared by the backends.
//!
//! Persistent backends frame every value as `[expires_at_ms: u64 BE][payload]`
//! where `0` means the record never expires.

use std::time::Duration;

use chrono::Utc;

#[cfg(feature = "rocksdb-backend")]
use crate::StorageError;

/// Length of the expiry header in bytes.
#[cfg(feature = "rocksdb-backend")]
const HEADER_LEN: usize = 8;

/// Absolute expiry in Unix milliseconds for a write happening now, or `None`
/// if the entry should live forever.
pub(crate) fn deadline(ttl: Option<Duration>) -> Option<i64> {
    let ttl = ttl.filter(|d| !d.is_zero())?;
    let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    Some(Utc::now().timestamp_millis().saturating_add(millis))
}

/// Whether a record with the given deadline is already dead.
pub(crate) fn is_expired(deadline: Option<i64>) -> bool {
    deadline.is_some_and(|at| at <= Utc::now().timestamp_millis())
}

/// Prefix `payload` with its expiry header.
#[cfg(feature = "rocksdb-backend")]
pub(crate) fn encode(deadline: Option<i64>, payload: &[u8]) -> Vec<u8> {
    let at = deadline.map_or(0, |at| u64::try_from(at).unwrap_or(0));
    let mut framed = Vec::with_capacity(HEADER_LEN.saturating_add(payload.len()));
    framed.extend_from_slice(&at.to_be_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Split a framed record into its deadline and payload.
#[cfg(feature = "rocksdb-backend")]
pub(crate) fn decode(path: &str, framed: &[u8]) -> Result<(Option<i64>, Vec<u8>), StorageError> {
    let Some((header, payload)) = framed.split_first_chunk::<HEADER_LEN>() else {
        return Err(StorageError::Corrupted {
            path: path.to_owned(),
            reason: format!("record shorter than {HEADER_LEN}-byte expiry header"),
        });
    };

    let at = u64::from_be_bytes(*header);
    let deadline = (at != 0).then(|| i64::try_from(at).unwrap_or(i64::MAX));
    Ok((deadline, payload.to_vec()))
}
