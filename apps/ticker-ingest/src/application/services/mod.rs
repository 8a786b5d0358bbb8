//! Application Services
//!
//! Services that drive the domain through the ports.
//!
//! - `FlushScheduler`: timer and size triggered, single-flight flushing
//! - `StreamConsumer`: feed messages into the batch buffer
//! - `ReconnectManager`: keeps the feed connected until shutdown
//! - `Pipeline`: wires everything together and owns shutdown

pub mod consumer;
pub mod flush;
pub mod pipeline;
pub mod reconnect;

pub use consumer::{SessionEnd, StreamConsumer};
pub use flush::{FlushOutcome, FlushScheduler, SkipReason};
pub use pipeline::{Pipeline, PipelineError, PipelineSettings, ShutdownReport};
pub use reconnect::{Backoff, ReconnectConfig, ReconnectManager, ReconnectPolicy};

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory port implementations for service tests.

    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::{Notify, mpsc};

    use crate::application::ports::{
        BatchSink, FeedConnection, FeedConnector, FeedError, FeedEvent, SchemaInitializer,
        SinkError,
    };
    use crate::domain::record::NormalizedRecord;

    /// Records every batch; fails the first `failures` writes.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        batches: Mutex<Vec<Vec<NormalizedRecord>>>,
        remaining_failures: AtomicUsize,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_first(failures: usize) -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
                remaining_failures: AtomicUsize::new(failures),
            }
        }

        /// Write attempts, failed ones included.
        pub fn calls(&self) -> usize {
            self.batches.lock().len()
        }

        pub fn batches(&self) -> Vec<Vec<NormalizedRecord>> {
            self.batches.lock().clone()
        }
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn write_batch(&self, rows: &[NormalizedRecord]) -> Result<(), SinkError> {
            self.batches.lock().push(rows.to_vec());
            let failing = self
                .remaining_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                Err(SinkError::Transport("connection refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    /// Holds every write open until the test releases it.
    #[derive(Debug)]
    pub struct GatedSink {
        started: Notify,
        release_tx: mpsc::UnboundedSender<Result<(), SinkError>>,
        release_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<(), SinkError>>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl GatedSink {
        pub fn new() -> Self {
            let (release_tx, release_rx) = mpsc::unbounded_channel();
            Self {
                started: Notify::new(),
                release_tx,
                release_rx: tokio::sync::Mutex::new(release_rx),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }

        pub async fn wait_for_write(&self) {
            self.started.notified().await;
        }

        pub fn release(&self, result: Result<(), SinkError>) {
            let _ = self.release_tx.send(result);
        }

        pub fn max_concurrent(&self) -> usize {
            self.max_active.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BatchSink for GatedSink {
        async fn write_batch(&self, _rows: &[NormalizedRecord]) -> Result<(), SinkError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            self.started.notify_one();

            let result = self.release_rx.lock().await.recv().await.unwrap_or(Ok(()));
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    /// Schema initializer that succeeds or fails on demand.
    #[derive(Debug)]
    pub struct StubSchema {
        fail: bool,
        calls: AtomicUsize,
    }

    impl StubSchema {
        pub fn ok() -> Self {
            Self {
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SchemaInitializer for StubSchema {
        async fn ensure_table(&self) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SinkError::Rejected {
                    status: 516,
                    body: "Authentication failed".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    /// Replays scripted events, then stays open until closed.
    #[derive(Debug)]
    pub struct ScriptedConnection {
        events: VecDeque<FeedEvent>,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedConnection {
        pub fn new(events: Vec<FeedEvent>) -> Self {
            Self {
                events: events.into(),
                closed: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn closed_flag(&self) -> Arc<AtomicBool> {
            Arc::clone(&self.closed)
        }
    }

    #[async_trait]
    impl FeedConnection for ScriptedConnection {
        async fn next_event(&mut self) -> FeedEvent {
            match self.events.pop_front() {
                Some(event) => event,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Hands out one scripted session per connect; refuses once exhausted.
    #[derive(Debug)]
    pub struct ScriptedConnector {
        sessions: Mutex<VecDeque<Result<Vec<FeedEvent>, FeedError>>>,
        attempts: Mutex<Vec<tokio::time::Instant>>,
        closed: Mutex<Vec<Arc<AtomicBool>>>,
    }

    impl ScriptedConnector {
        pub fn new(sessions: Vec<Result<Vec<FeedEvent>, FeedError>>) -> Self {
            Self {
                sessions: Mutex::new(sessions.into()),
                attempts: Mutex::new(Vec::new()),
                closed: Mutex::new(Vec::new()),
            }
        }

        pub fn attempts(&self) -> Vec<tokio::time::Instant> {
            self.attempts.lock().clone()
        }

        pub fn closed_connections(&self) -> usize {
            self.closed
                .lock()
                .iter()
                .filter(|flag| flag.load(Ordering::SeqCst))
                .count()
        }
    }

    #[async_trait]
    impl FeedConnector for ScriptedConnector {
        async fn connect(&self) -> Result<Box<dyn FeedConnection>, FeedError> {
            self.attempts.lock().push(tokio::time::Instant::now());
            let session = self
                .sessions
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(FeedError::Connect("connection refused".to_string())));

            let conn = ScriptedConnection::new(session?);
            self.closed.lock().push(conn.closed_flag());
            Ok(Box::new(conn))
        }
    }
}
