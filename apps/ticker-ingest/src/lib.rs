#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation
    )
)]

//! Ticker Ingest - Market Ticker Collector
//!
//! Subscribes to the Binance all-market mini-ticker WebSocket stream,
//! normalizes each tick into a row, and bulk-inserts batches into a
//! ClickHouse table over HTTP.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Rows, buffering and connection state
//!   - `record`: Normalized tick rows
//!   - `buffer`: Batch buffer and overflow trimming
//!   - `connection`: Feed connection lifecycle
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Feed, decoder and store interfaces
//!   - `services`: Flush scheduling, stream consumption, reconnection, pipeline
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `binance`: Mini-ticker codec and WebSocket transport
//!   - `clickhouse`: HTTP insert and table DDL
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! Binance WS ──► TickerCodec ──► BatchBuffer ──► FlushScheduler ──► ClickHouse
//!     ▲                               ▲                │
//!     └── ReconnectManager            └── requeue ◄────┘ (on failure)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core ingestion types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::buffer::{BatchBuffer, OverflowPolicy, OverflowReport};
pub use domain::connection::{ConnectionState, FeedState};
pub use domain::record::{NormalizedRecord, RecordFields};

// Ports
pub use application::ports::{
    BatchSink, CodecError, FeedConnection, FeedConnector, FeedError, FeedEvent, MessageDecoder,
    SchemaInitializer, SinkError,
};

// Services
pub use application::services::{
    FlushOutcome, FlushScheduler, Pipeline, PipelineError, PipelineSettings, ReconnectConfig,
    ShutdownReport, SkipReason,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, IngestConfig};

// Adapters
pub use infrastructure::binance::{TickerCodec, WebSocketConnector};
pub use infrastructure::clickhouse::ClickHouseClient;

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
