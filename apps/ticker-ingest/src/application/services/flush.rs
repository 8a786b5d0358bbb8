//! Flush Scheduler
//!
//! Decides when buffered records are written to the store and owns the
//! success and failure paths of every write.
//!
//! # Triggers
//!
//! - a repeating timer (`flush_interval`, first tick one interval after start)
//! - a size trigger raised by the stream consumer via [`FlushScheduler::request_flush`]
//!
//! A size trigger raised while a write is in flight is remembered and
//! served as soon as that write finishes.
//!
//! # Single-flight
//!
//! At most one [`FlushScheduler::try_flush`] holds the in-flight flag at a
//! time; any concurrent call returns [`FlushOutcome::Skipped`] without
//! touching the buffer. The flag is released by a guard, so it is cleared
//! on every exit path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::BatchSink;
use crate::domain::buffer::{BatchBuffer, OverflowPolicy, OverflowReport};
use crate::domain::record::NormalizedRecord;
use crate::infrastructure::metrics::{self, FlushResult};

/// Default timer trigger period (`FLUSH_INTERVAL_MS`).
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(2000);

/// Default size trigger (`BATCH_MAX`).
pub const DEFAULT_BATCH_MAX: usize = 1000;

// =============================================================================
// Outcome
// =============================================================================

/// Why a flush did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another flush holds the single-flight flag.
    InFlight,
    /// Nothing was buffered.
    Empty,
}

/// Result of one [`FlushScheduler::try_flush`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// No write was attempted.
    Skipped(SkipReason),
    /// The batch was written and discarded.
    Flushed {
        /// Rows written.
        rows: usize,
    },
    /// The write failed; the batch was requeued at the front.
    Failed {
        /// Rows requeued.
        rows: usize,
        /// Set when requeueing pushed the buffer over its bound.
        overflow: Option<OverflowReport>,
        /// Failure reason, as reported by the sink.
        reason: String,
    },
}

impl FlushOutcome {
    /// Whether a write was attempted.
    #[must_use]
    pub const fn attempted(&self) -> bool {
        !matches!(self, Self::Skipped(_))
    }
}

// =============================================================================
// Guards
// =============================================================================

/// Holds the single-flight flag; clears it on drop.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A drained batch that goes back to the buffer unless committed.
///
/// If the flush future is dropped mid-write the batch is requeued rather
/// than lost.
struct PendingBatch<'a> {
    buffer: &'a BatchBuffer,
    rows: Option<Vec<NormalizedRecord>>,
}

impl<'a> PendingBatch<'a> {
    fn drain(buffer: &'a BatchBuffer) -> Self {
        Self {
            buffer,
            rows: Some(buffer.drain_all()),
        }
    }

    fn rows(&self) -> &[NormalizedRecord] {
        self.rows.as_deref().unwrap_or_default()
    }

    fn commit(mut self) {
        self.rows = None;
    }

    fn requeue(mut self) {
        if let Some(rows) = self.rows.take() {
            self.buffer.requeue_front(rows);
        }
    }
}

impl Drop for PendingBatch<'_> {
    fn drop(&mut self) {
        if let Some(rows) = self.rows.take() {
            self.buffer.requeue_front(rows);
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct FlushStats {
    rows_written: AtomicU64,
    rows_dropped: AtomicU64,
    write_attempts: AtomicU64,
    consecutive_failures: AtomicU32,
    last_success_at: RwLock<Option<DateTime<Utc>>>,
}

// =============================================================================
// Scheduler
// =============================================================================

/// Timer and size driven flusher with a single-flight guarantee.
pub struct FlushScheduler {
    buffer: Arc<BatchBuffer>,
    sink: Arc<dyn BatchSink>,
    overflow: OverflowPolicy,
    flush_interval: Duration,
    in_flight: AtomicBool,
    trigger: Notify,
    stats: FlushStats,
}

impl FlushScheduler {
    /// Create a scheduler over `buffer`, writing to `sink`.
    #[must_use]
    pub fn new(
        buffer: Arc<BatchBuffer>,
        sink: Arc<dyn BatchSink>,
        overflow: OverflowPolicy,
        flush_interval: Duration,
    ) -> Self {
        Self {
            buffer,
            sink,
            overflow,
            flush_interval,
            in_flight: AtomicBool::new(false),
            trigger: Notify::new(),
            stats: FlushStats::default(),
        }
    }

    /// Raise the size trigger.
    pub fn request_flush(&self) {
        self.trigger.notify_one();
    }

    /// Attempt one flush.
    ///
    /// No-op when a flush is already in flight or the buffer is empty.
    /// Write failures are absorbed here: the batch is requeued, the
    /// overflow bound enforced, and the failure reported in the outcome.
    pub async fn try_flush(&self) -> FlushOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            tracing::trace!("Flush already in flight, skipping");
            return FlushOutcome::Skipped(SkipReason::InFlight);
        };

        let pending = PendingBatch::drain(&self.buffer);
        let rows = pending.rows().len();
        if rows == 0 {
            return FlushOutcome::Skipped(SkipReason::Empty);
        }

        self.stats.write_attempts.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let result = self.sink.write_batch(pending.rows()).await;
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                pending.commit();
                self.record_success(rows);
                metrics::record_flush(FlushResult::Success, rows as u64, elapsed);
                tracing::info!(
                    rows,
                    elapsed_ms = elapsed.as_millis(),
                    buffered = self.buffer.len(),
                    "Flushed batch to store"
                );
                FlushOutcome::Flushed { rows }
            }
            Err(e) => {
                pending.requeue();
                let overflow = self.overflow.enforce(&self.buffer);
                if let Some(report) = overflow {
                    self.stats
                        .rows_dropped
                        .fetch_add(report.dropped as u64, Ordering::Relaxed);
                    metrics::record_rows_dropped(report.dropped as u64);
                }
                let failures = self.stats.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::record_flush(FlushResult::Failure, rows as u64, elapsed);
                tracing::error!(
                    error = %e,
                    rows,
                    buffered = self.buffer.len(),
                    consecutive_failures = failures,
                    "Flush failed, batch requeued"
                );
                FlushOutcome::Failed {
                    rows,
                    overflow,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Run the timer and size triggers until `cancel` fires.
    ///
    /// A flush that has started is always finished before the loop exits.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + self.flush_interval;
        let mut ticker = tokio::time::interval_at(start, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(
            interval_ms = self.flush_interval.as_millis(),
            "Flush scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                () = self.trigger.notified() => {}
            }

            self.flush_and_report().await;
        }

        tracing::debug!("Flush scheduler stopped");
    }

    async fn flush_and_report(&self) -> FlushOutcome {
        metrics::set_buffer_length(self.buffer.len());
        let outcome = self.try_flush().await;
        if outcome.attempted() {
            metrics::set_buffer_length(self.buffer.len());
        }
        outcome
    }

    fn record_success(&self, rows: usize) {
        self.stats
            .rows_written
            .fetch_add(rows as u64, Ordering::Relaxed);
        self.stats.consecutive_failures.store(0, Ordering::Relaxed);
        *self.stats.last_success_at.write() = Some(Utc::now());
    }

    /// The buffer this scheduler drains.
    #[must_use]
    pub fn buffer(&self) -> &Arc<BatchBuffer> {
        &self.buffer
    }

    /// The overflow bound applied after failed writes.
    #[must_use]
    pub const fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow
    }

    /// Whether a flush currently holds the single-flight flag.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Rows successfully written since start.
    #[must_use]
    pub fn rows_written(&self) -> u64 {
        self.stats.rows_written.load(Ordering::Relaxed)
    }

    /// Rows discarded by overflow trimming since start.
    #[must_use]
    pub fn rows_dropped(&self) -> u64 {
        self.stats.rows_dropped.load(Ordering::Relaxed)
    }

    /// Write attempts since start.
    #[must_use]
    pub fn write_attempts(&self) -> u64 {
        self.stats.write_attempts.load(Ordering::Relaxed)
    }

    /// Failed writes since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.stats.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Time of the last successful write.
    #[must_use]
    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        *self.stats.last_success_at.read()
    }
}

impl std::fmt::Debug for FlushScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushScheduler")
            .field("buffered", &self.buffer.len())
            .field("overflow", &self.overflow)
            .field("flush_interval", &self.flush_interval)
            .field("in_flight", &self.is_in_flight())
            .finish_non_exhaustive()
    }
}
