//! Prometheus Metrics Module
//!
//! Exposes ingestion metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Feed**: messages, records, parse errors, connection state, attempts
//! - **Buffer**: current length and records dropped by overflow trimming
//! - **Flush**: attempts by outcome, rows, write latency
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Without an
//! installed recorder every recording function is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Feed
    describe_counter!(
        "ticker_ingest_records_received_total",
        "Records decoded from feed messages"
    );
    describe_counter!(
        "ticker_ingest_parse_errors_total",
        "Feed messages dropped because they could not be decoded"
    );
    describe_counter!(
        "ticker_ingest_conversion_anomalies_total",
        "Records carrying a not-a-number price or volume"
    );
    describe_gauge!(
        "ticker_ingest_feed_connected",
        "1 while the feed WebSocket is connected"
    );
    describe_counter!(
        "ticker_ingest_connect_attempts_total",
        "Feed connection attempts"
    );

    // Buffer
    describe_gauge!(
        "ticker_ingest_buffer_records",
        "Records waiting to be flushed"
    );
    describe_counter!(
        "ticker_ingest_rows_dropped_total",
        "Buffered records discarded by overflow trimming"
    );

    // Flush
    describe_counter!(
        "ticker_ingest_flushes_total",
        "Flush write attempts by outcome"
    );
    describe_counter!(
        "ticker_ingest_rows_written_total",
        "Rows accepted by the store"
    );
    describe_histogram!(
        "ticker_ingest_flush_duration_seconds",
        "Store write latency per flush"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric label for flush outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushResult {
    /// The store accepted the batch.
    Success,
    /// The write failed and the batch was requeued.
    Failure,
}

impl FlushResult {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Record records decoded from one feed message.
pub fn record_records_received(count: u64) {
    counter!("ticker_ingest_records_received_total").increment(count);
}

/// Record a feed message dropped by the decoder.
pub fn record_parse_error() {
    counter!("ticker_ingest_parse_errors_total").increment(1);
}

/// Record records carrying a not-a-number price or volume.
pub fn record_conversion_anomalies(count: u64) {
    counter!("ticker_ingest_conversion_anomalies_total").increment(count);
}

/// Update the feed connection gauge.
pub fn set_feed_connected(connected: bool) {
    gauge!("ticker_ingest_feed_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a feed connection attempt.
pub fn record_connect_attempt() {
    counter!("ticker_ingest_connect_attempts_total").increment(1);
}

/// Update the buffer length gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_buffer_length(len: usize) {
    gauge!("ticker_ingest_buffer_records").set(len as f64);
}

/// Record records discarded by overflow trimming.
pub fn record_rows_dropped(count: u64) {
    counter!("ticker_ingest_rows_dropped_total").increment(count);
}

/// Record one flush write attempt.
pub fn record_flush(result: FlushResult, rows: u64, duration: Duration) {
    counter!(
        "ticker_ingest_flushes_total",
        "result" => result.as_str()
    )
    .increment(1);
    if result == FlushResult::Success {
        counter!("ticker_ingest_rows_written_total").increment(rows);
    }
    histogram!(
        "ticker_ingest_flush_duration_seconds",
        "result" => result.as_str()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
