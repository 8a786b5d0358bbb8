//! Reconnect Manager
//!
//! Explicit state machine around the feed connection:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (close/error) -> Disconnected
//!       ^                |                                      |
//!       |                +------ (connect failed) --------------+
//!       +---------------- sleep(delay) -------------------------+
//! ```
//!
//! The loop never gives up; it ends only when the shutdown token fires.
//! The delay is fixed by default. A capped exponential backoff with jitter
//! can be selected instead; either way it resets after every successful
//! connection.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::application::ports::FeedConnector;
use crate::application::services::consumer::{SessionEnd, StreamConsumer};
use crate::domain::connection::{ConnectionState, FeedState};
use crate::infrastructure::metrics;

/// Default delay between connection attempts (`RECONNECT_DELAY_MS`).
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);

// =============================================================================
// Policy
// =============================================================================

/// How the delay evolves across consecutive failed attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay every time.
    Fixed,
    /// Delay multiplied after each attempt, capped at `max_delay`.
    Exponential {
        /// Upper bound for the delay.
        max_delay: Duration,
        /// Growth factor (2.0 doubles the delay each attempt).
        multiplier: f64,
        /// Jitter as a fraction (0.1 = ±10%).
        jitter_factor: f64,
    },
}

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub delay: Duration,
    /// Delay strategy.
    pub backoff: Backoff,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            backoff: Backoff::Fixed,
        }
    }
}

impl ReconnectConfig {
    /// Fixed delay between attempts.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            backoff: Backoff::Fixed,
        }
    }

    /// Doubling backoff from `delay` up to `max_delay`, with ±10% jitter.
    #[must_use]
    pub const fn exponential(delay: Duration, max_delay: Duration) -> Self {
        Self {
            delay,
            backoff: Backoff::Exponential {
                max_delay,
                multiplier: 2.0,
                jitter_factor: 0.1,
            },
        }
    }
}

/// Computes the delay before each reconnection attempt.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            current_delay: config.delay,
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt_count = self.attempt_count.saturating_add(1);

        let Backoff::Exponential {
            max_delay,
            multiplier,
            jitter_factor,
        } = self.config.backoff
        else {
            return self.config.delay;
        };

        let delay = apply_jitter(self.current_delay, jitter_factor);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        delay
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.delay;
        self.attempt_count = 0;
    }

    /// Attempts since the last successful connection.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }
}

fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    #[allow(clippy::cast_precision_loss)]
    let base_millis = duration.as_millis() as f64;
    let jitter_range = base_millis * jitter_factor;
    let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
    let adjusted_millis = (base_millis + jitter).max(1.0);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let adjusted_u64 = adjusted_millis as u64;
    Duration::from_millis(adjusted_u64)
}

// =============================================================================
// Manager
// =============================================================================

/// Keeps the feed connected until shutdown.
pub struct ReconnectManager {
    connector: Arc<dyn FeedConnector>,
    consumer: StreamConsumer,
    feed_state: Arc<FeedState>,
    config: ReconnectConfig,
}

impl ReconnectManager {
    /// Create a manager that hands every connection to `consumer`.
    #[must_use]
    pub fn new(
        connector: Arc<dyn FeedConnector>,
        consumer: StreamConsumer,
        feed_state: Arc<FeedState>,
        config: ReconnectConfig,
    ) -> Self {
        Self {
            connector,
            consumer,
            feed_state,
            config,
        }
    }

    /// Run the connect / consume / wait loop until `cancel` fires.
    ///
    /// The first attempt is made immediately.
    pub async fn run(self, cancel: CancellationToken) {
        let mut policy = ReconnectPolicy::new(self.config);

        while !cancel.is_cancelled() {
            self.feed_state.set_state(ConnectionState::Connecting);
            metrics::record_connect_attempt();

            let connected = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = self.connector.connect() => Some(result),
            };
            let Some(connected) = connected else {
                break;
            };

            match connected {
                Ok(mut conn) => {
                    self.feed_state.set_state(ConnectionState::Connected);
                    metrics::set_feed_connected(true);
                    policy.reset();
                    tracing::info!("Feed connected");

                    let end = self.consumer.run(conn.as_mut(), &cancel).await;
                    metrics::set_feed_connected(false);
                    if end == SessionEnd::Shutdown {
                        break;
                    }
                }
                Err(e) => {
                    self.feed_state.set_state(ConnectionState::Disconnected);
                    self.feed_state.set_error(e.to_string());
                    tracing::warn!(error = %e, "Feed connection attempt failed");
                }
            }

            let delay = policy.next_delay();
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting to feed"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!("Shutdown during reconnect delay");
                    break;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.feed_state.set_state(ConnectionState::Disconnected);
        tracing::info!("Reconnect manager stopped");
    }
}

impl std::fmt::Debug for ReconnectManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectManager")
            .field("config", &self.config)
            .field("state", &self.feed_state.get_state())
            .finish_non_exhaustive()
    }
}
