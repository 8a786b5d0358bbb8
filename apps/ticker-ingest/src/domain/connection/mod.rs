//! Feed Connection State
//!
//! The single connection state shared by the stream consumer and the
//! reconnect manager, plus counters read by the health endpoint.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;

/// Lifecycle state of the feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection; a reconnect may be pending.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected and receiving messages.
    Connected,
}

impl ConnectionState {
    /// Lowercase name for logs and the health endpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// Shared feed state.
///
/// State changes are published on a watch channel so observers (tests,
/// the health endpoint) can follow transitions without polling.
#[derive(Debug)]
pub struct FeedState {
    state: watch::Sender<ConnectionState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    connect_attempts: AtomicU32,
    messages_received: AtomicU64,
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedState {
    /// Create state starting in [`ConnectionState::Disconnected`].
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            last_connected_at: RwLock::new(None),
            last_error: RwLock::new(None),
            connect_attempts: AtomicU32::new(0),
            messages_received: AtomicU64::new(0),
        }
    }

    /// Set the connection state.
    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
        match state {
            ConnectionState::Connecting => {
                self.connect_attempts.fetch_add(1, Ordering::Relaxed);
            }
            ConnectionState::Connected => {
                *self.last_connected_at.write() = Some(Utc::now());
                *self.last_error.write() = None;
            }
            ConnectionState::Disconnected => {}
        }
    }

    /// Record why the last connection ended or failed.
    pub fn set_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    /// Count one inbound feed message.
    pub fn increment_messages(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Current connection state.
    #[must_use]
    pub fn get_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Total connection attempts since start.
    #[must_use]
    pub fn get_connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Total inbound feed messages since start.
    #[must_use]
    pub fn get_messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Time of the last successful connection.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Reason the last connection ended, cleared on reconnect.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }
}
