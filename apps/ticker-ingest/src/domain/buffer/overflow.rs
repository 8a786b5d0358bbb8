//! Overflow Policy
//!
//! Bounds the buffer under sustained store failure by discarding the
//! oldest records. Dropped records are gone for good; the caller reports
//! every drop as data loss.

use super::{BatchBuffer, DEFAULT_MAX_BUFFERED};

/// Outcome of an overflow trim that discarded records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverflowReport {
    /// Oldest records discarded.
    pub dropped: usize,
    /// Records retained (equal to the bound).
    pub retained: usize,
}

/// Keeps at most `max_buffered` of the most recently arrived records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverflowPolicy {
    max_buffered: usize,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFERED)
    }
}

impl OverflowPolicy {
    /// Create a policy with the given bound.
    #[must_use]
    pub const fn new(max_buffered: usize) -> Self {
        Self { max_buffered }
    }

    /// The configured bound.
    #[must_use]
    pub const fn max_buffered(&self) -> usize {
        self.max_buffered
    }

    /// Trim `buffer` down to the bound.
    ///
    /// Returns `None` when nothing had to be dropped.
    pub fn enforce(&self, buffer: &BatchBuffer) -> Option<OverflowReport> {
        let dropped = buffer.retain_newest(self.max_buffered);
        if dropped == 0 {
            return None;
        }

        tracing::warn!(
            dropped,
            retained = self.max_buffered,
            "Buffer exceeded bound, dropped oldest records"
        );

        Some(OverflowReport {
            dropped,
            retained: self.max_buffered,
        })
    }
}
