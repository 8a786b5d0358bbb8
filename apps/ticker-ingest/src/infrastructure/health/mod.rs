//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, ingestion status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness check (simple OK)
//! - `GET /readyz` - Kubernetes readiness check (feed connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::FlushScheduler;
use crate::domain::connection::{ConnectionState, FeedState};
use crate::infrastructure::metrics::get_metrics_handle;

/// Consecutive failed flushes after which a disconnected ingester is unhealthy.
const UNHEALTHY_FLUSH_FAILURES: u32 = 3;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Ingester version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Feed connection status.
    pub feed: FeedInfo,
    /// Buffer status.
    pub buffer: BufferInfo,
    /// Flush statistics.
    pub flush: FlushInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Feed connected and writes succeeding.
    Healthy,
    /// Feed reconnecting or writes failing.
    Degraded,
    /// Feed down and writes failing.
    Unhealthy,
}

/// Feed connection status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Connection state.
    pub state: String,
    /// Whether the feed is connected.
    pub connected: bool,
    /// Messages received count.
    pub messages_received: u64,
    /// Connection attempts since start.
    pub connect_attempts: u32,
    /// Last successful connection.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Why the last connection ended.
    pub last_error: Option<String>,
}

/// Buffer status.
#[derive(Debug, Clone, Serialize)]
pub struct BufferInfo {
    /// Records awaiting a write.
    pub records: usize,
    /// Overflow bound.
    pub max_records: usize,
    /// Whether a flush is in flight.
    pub flush_in_flight: bool,
}

/// Flush statistics.
#[derive(Debug, Clone, Serialize)]
pub struct FlushInfo {
    /// Rows accepted by the store.
    pub rows_written: u64,
    /// Rows discarded by overflow trimming.
    pub rows_dropped: u64,
    /// Write attempts.
    pub write_attempts: u64,
    /// Failed writes since the last success.
    pub consecutive_failures: u32,
    /// Last successful write.
    pub last_success_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed_state: Arc<FeedState>,
    scheduler: Arc<FlushScheduler>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, feed_state: Arc<FeedState>, scheduler: Arc<FlushScheduler>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed_state,
            scheduler,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.feed_state.get_state() == ConnectionState::Connected {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let feed = &state.feed_state;
    let scheduler = &state.scheduler;
    let connection_state = feed.get_state();

    let feed_info = FeedInfo {
        state: connection_state.as_str().to_string(),
        connected: connection_state == ConnectionState::Connected,
        messages_received: feed.get_messages_received(),
        connect_attempts: feed.get_connect_attempts(),
        last_connected_at: feed.last_connected_at(),
        last_error: feed.last_error(),
    };

    let flush = FlushInfo {
        rows_written: scheduler.rows_written(),
        rows_dropped: scheduler.rows_dropped(),
        write_attempts: scheduler.write_attempts(),
        consecutive_failures: scheduler.consecutive_failures(),
        last_success_at: scheduler.last_success_at(),
    };

    HealthResponse {
        status: determine_health_status(&feed_info, &flush),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed: feed_info,
        buffer: BufferInfo {
            records: scheduler.buffer().len(),
            max_records: scheduler.overflow_policy().max_buffered(),
            flush_in_flight: scheduler.is_in_flight(),
        },
        flush,
    }
}

fn determine_health_status(feed: &FeedInfo, flush: &FlushInfo) -> HealthStatus {
    match (feed.connected, flush.consecutive_failures) {
        (true, 0) => HealthStatus::Healthy,
        (false, failures) if failures >= UNHEALTHY_FLUSH_FAILURES => HealthStatus::Unhealthy,
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
