//! Stream Consumer
//!
//! Single dispatch loop over one feed connection. Every inbound message is
//! decoded and appended to the batch buffer; reaching the batch size raises
//! the flush scheduler's size trigger. The consumer never reconnects on its
//! own: a lost connection ends the session and the reconnect manager takes
//! over.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::application::ports::{FeedConnection, FeedEvent, MessageDecoder};
use crate::application::services::flush::FlushScheduler;
use crate::domain::connection::{ConnectionState, FeedState};
use crate::infrastructure::metrics;

/// How a consumer session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The connection was closed or failed.
    Lost {
        /// Close or error reason.
        reason: String,
    },
    /// Shutdown was requested; the connection was closed locally.
    Shutdown,
}

/// Decodes feed messages into the batch buffer.
pub struct StreamConsumer {
    decoder: Arc<dyn MessageDecoder>,
    scheduler: Arc<FlushScheduler>,
    feed_state: Arc<FeedState>,
    batch_max: usize,
}

impl StreamConsumer {
    /// Create a consumer appending into the scheduler's buffer.
    #[must_use]
    pub fn new(
        decoder: Arc<dyn MessageDecoder>,
        scheduler: Arc<FlushScheduler>,
        feed_state: Arc<FeedState>,
        batch_max: usize,
    ) -> Self {
        Self {
            decoder,
            scheduler,
            feed_state,
            batch_max,
        }
    }

    /// Consume `conn` until it is lost or `cancel` fires.
    pub async fn run(
        &self,
        conn: &mut dyn FeedConnection,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                event = conn.next_event() => Some(event),
            };

            let Some(event) = event else {
                conn.close().await;
                self.feed_state.set_state(ConnectionState::Disconnected);
                tracing::info!("Feed connection closed for shutdown");
                return SessionEnd::Shutdown;
            };

            match event {
                FeedEvent::Message(raw) => {
                    self.handle_message(&raw);
                }
                FeedEvent::Closed { reason } => {
                    let reason = reason.unwrap_or_else(|| "closed by peer".to_string());
                    tracing::warn!(reason = %reason, "Feed connection closed");
                    return self.lost(reason);
                }
                FeedEvent::Error(e) => {
                    tracing::warn!(error = %e, "Feed connection failed");
                    return self.lost(e.to_string());
                }
            }
        }
    }

    /// Decode one raw message and buffer its records.
    ///
    /// A message that fails to decode is dropped and reported; it never
    /// ends the session. Returns the number of records appended.
    pub fn handle_message(&self, raw: &str) -> usize {
        self.feed_state.increment_messages();

        let records = match self.decoder.decode(raw) {
            Ok(records) => records,
            Err(e) => {
                metrics::record_parse_error();
                tracing::error!(error = %e, bytes = raw.len(), "Dropped unparseable feed message");
                return 0;
            }
        };

        if records.is_empty() {
            tracing::trace!("Feed message carried no ticks");
            return 0;
        }

        let count = records.len();
        let anomalies = records
            .iter()
            .filter(|record| record.has_conversion_anomaly())
            .count();
        if anomalies > 0 {
            metrics::record_conversion_anomalies(anomalies as u64);
            tracing::debug!(anomalies, "Ticks carried non-numeric price or volume fields");
        }
        metrics::record_records_received(count as u64);

        let buffered = self.scheduler.buffer().append_all(records);
        if buffered >= self.batch_max {
            tracing::debug!(buffered, batch_max = self.batch_max, "Batch size reached");
            self.scheduler.request_flush();
        }

        count
    }

    fn lost(&self, reason: String) -> SessionEnd {
        self.feed_state.set_state(ConnectionState::Disconnected);
        self.feed_state.set_error(reason.clone());
        SessionEnd::Lost { reason }
    }
}

impl std::fmt::Debug for StreamConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConsumer")
            .field("batch_max", &self.batch_max)
            .finish_non_exhaustive()
    }
}
