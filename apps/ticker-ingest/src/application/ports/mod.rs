//! Port Interfaces
//!
//! Contracts between the ingestion core and the outside world. The
//! infrastructure layer provides the concrete adapters.
//!
//! ## Driven Ports (Outbound)
//!
//! - `BatchSink`: one batched write attempt against the store
//! - `SchemaInitializer`: one-time idempotent "ensure table exists"
//!
//! ## Driver Ports (Inbound)
//!
//! - `FeedConnector` / `FeedConnection`: the real-time feed, surfaced as a
//!   closed set of [`FeedEvent`] variants consumed by a single loop
//! - `MessageDecoder`: wire message to records

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::record::NormalizedRecord;

// =============================================================================
// Store
// =============================================================================

/// Why a store call failed. Every variant is treated as a plain failure
/// by the flush path; there is no partial-batch success.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// No response within the request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The store answered with a non-success status.
    #[error("store rejected request with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, as returned by the store.
        body: String,
    },

    /// The batch could not be serialized.
    #[error("failed to encode batch: {0}")]
    Encode(String),
}

/// Performs one batched write. Implementations do not retry.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Write every row of `rows`, in order, as one request.
    async fn write_batch(&self, rows: &[NormalizedRecord]) -> Result<(), SinkError>;
}

/// Creates the destination table if it does not exist.
#[async_trait]
pub trait SchemaInitializer: Send + Sync {
    /// Ensure the table exists. Must be idempotent.
    async fn ensure_table(&self) -> Result<(), SinkError>;
}

// =============================================================================
// Feed
// =============================================================================

/// Why a feed connection could not be opened or was lost.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The transport failed while connected.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Everything a live feed connection can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// One raw feed message (text; binary frames are decoded as UTF-8).
    Message(String),
    /// The connection closed, cleanly or by the peer.
    Closed {
        /// Close reason, when the peer sent one.
        reason: Option<String>,
    },
    /// The connection failed.
    Error(FeedError),
}

/// An open feed connection.
///
/// After `Closed` or `Error` has been returned the connection is finished
/// and `next_event` must not be called again.
#[async_trait]
pub trait FeedConnection: Send {
    /// Wait for the next event.
    async fn next_event(&mut self) -> FeedEvent;

    /// Close the connection. Best-effort.
    async fn close(&mut self);
}

/// Opens feed connections.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Open a new connection to the feed.
    async fn connect(&self) -> Result<Box<dyn FeedConnection>, FeedError>;
}

// =============================================================================
// Decoding
// =============================================================================

/// Why a feed message was dropped.
///
/// Decoding is all-or-nothing per message: one bad tick drops the whole
/// message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The message is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// The top-level value is neither an array nor an object.
    #[error("unexpected message framing: {0}")]
    InvalidFraming(&'static str),

    /// A tick entry is not a JSON object.
    #[error("tick {index} is not an object")]
    NotAnObject {
        /// Position within the message.
        index: usize,
    },

    /// A tick entry has no string `s` field.
    #[error("tick {index} has no symbol")]
    MissingSymbol {
        /// Position within the message.
        index: usize,
    },

    /// A tick entry has a missing or non-numeric `E` field.
    #[error("tick {index} has an invalid event time")]
    InvalidEventTime {
        /// Position within the message.
        index: usize,
    },
}

/// Turns one raw feed message into zero or more records.
pub trait MessageDecoder: Send + Sync {
    /// Decode `raw`, preserving tick order.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if any part of the message is malformed.
    fn decode(&self, raw: &str) -> Result<Vec<NormalizedRecord>, CodecError>;
}
