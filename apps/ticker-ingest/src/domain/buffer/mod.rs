//! Batch Buffer
//!
//! Ordered holding area for records awaiting a store write, plus the
//! overflow policy that bounds it while the store is unavailable.
//!
//! # Ordering
//!
//! Records are kept in arrival order. A failed batch is put back in front
//! of everything appended since it was drained, so after a failure the
//! buffer reads `[failed batch][newer arrivals]`.
//!
//! # Concurrency
//!
//! `append`, `drain_all`, `requeue_front` and `retain_newest` each run
//! under one mutex, so an append racing a drain lands either in the
//! drained batch or in the fresh buffer, never in neither.

mod overflow;

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::record::NormalizedRecord;

pub use overflow::{OverflowPolicy, OverflowReport};

/// Default overflow bound (`MAX_OVERFLOW`).
pub const DEFAULT_MAX_BUFFERED: usize = 100_000;

/// Ordered, growable buffer of [`NormalizedRecord`]s.
#[derive(Debug, Default)]
pub struct BatchBuffer {
    records: Mutex<VecDeque<NormalizedRecord>>,
}

impl BatchBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record at the end. Returns the length after the append.
    pub fn append(&self, record: NormalizedRecord) -> usize {
        let mut records = self.records.lock();
        records.push_back(record);
        records.len()
    }

    /// Append every record of one feed message in order, under a single
    /// lock. Returns the length after the append.
    pub fn append_all<I>(&self, batch: I) -> usize
    where
        I: IntoIterator<Item = NormalizedRecord>,
    {
        let mut records = self.records.lock();
        records.extend(batch);
        records.len()
    }

    /// Remove and return every held record, leaving the buffer empty.
    #[must_use]
    pub fn drain_all(&self) -> Vec<NormalizedRecord> {
        let mut records = self.records.lock();
        std::mem::take(&mut *records).into()
    }

    /// Put a previously drained batch back ahead of anything appended
    /// since the drain.
    pub fn requeue_front(&self, batch: Vec<NormalizedRecord>) {
        if batch.is_empty() {
            return;
        }
        let mut records = self.records.lock();
        let mut merged = VecDeque::from(batch);
        merged.append(&mut records);
        *records = merged;
    }

    /// Keep only the `max` most recently appended records.
    ///
    /// Returns how many of the oldest records were discarded.
    pub fn retain_newest(&self, max: usize) -> usize {
        let mut records = self.records.lock();
        let excess = records.len().saturating_sub(max);
        if excess > 0 {
            let newest = records.split_off(excess);
            *records = newest;
        }
        excess
    }

    /// Current number of buffered records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the buffer holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Copy of the buffered records, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<NormalizedRecord> {
        self.records.lock().iter().cloned().collect()
    }
}
