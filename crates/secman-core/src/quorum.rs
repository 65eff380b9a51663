//! Unseal share collection.
//!
//! The buffer only counts. Whether the collected shares are any good is
//! decided by the barrier once the threshold is reached.

use zeroize::Zeroize;

/// Bounded list of submitted unseal shares.
///
/// Never holds more than `threshold` shares.
pub struct QuorumBuffer {
    shares: Vec<Vec<u8>>,
    threshold: usize,
}

impl QuorumBuffer {
    /// Create a buffer that fills after `threshold` shares.
    #[must_use]
    pub fn new(threshold: usize) -> Self {
        Self {
            shares: Vec::with_capacity(threshold),
            threshold,
        }
    }

    /// Append a share. Returns `true` exactly when the buffer became full
    /// with this call.
    ///
    /// A share offered to an already full buffer is dropped.
    pub fn add(&mut self, share: Vec<u8>) -> bool {
        if self.shares.len() >= self.threshold {
            return false;
        }
        self.shares.push(share);
        self.shares.len() == self.threshold
    }

    /// Wipe and drop every collected share, keeping the allocation.
    pub fn clear(&mut self) {
        for share in &mut self.shares {
            share.zeroize();
        }
        self.shares.clear();
    }

    /// Collected shares in submission order.
    #[must_use]
    pub fn shares(&self) -> &[Vec<u8>] {
        &self.shares
    }

    /// Number of shares collected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shares.len()
    }

    /// Whether no share has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    /// Shares required to fill the buffer.
    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Operator-facing progress, e.g. `2/3`.
    #[must_use]
    pub fn info(&self) -> String {
        format!("{}/{}", self.shares.len(), self.threshold)
    }
}

impl Drop for QuorumBuffer {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for QuorumBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuorumBuffer")
            .field("progress", &self.info())
            .finish_non_exhaustive()
    }
}
