//! Pipeline
//!
//! Composition root for the ingestion core. Owns the shared state (buffer,
//! feed state, flush scheduler) as fields of one instance and runs the
//! lifecycle as an explicit sequence:
//!
//! 1. ensure the destination table exists (fatal on failure)
//! 2. start the flush scheduler and the reconnect manager
//! 3. wait for the shutdown signal
//! 4. cancel both tasks and wait for them to stop
//! 5. run one final best-effort flush

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    BatchSink, FeedConnector, MessageDecoder, SchemaInitializer, SinkError,
};
use crate::application::services::consumer::StreamConsumer;
use crate::application::services::flush::{
    DEFAULT_BATCH_MAX, DEFAULT_FLUSH_INTERVAL, FlushOutcome, FlushScheduler,
};
use crate::application::services::reconnect::{ReconnectConfig, ReconnectManager};
use crate::domain::buffer::{BatchBuffer, DEFAULT_MAX_BUFFERED, OverflowPolicy};
use crate::domain::connection::FeedState;

/// Tuning for the ingestion core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    /// Buffer length that raises the size trigger.
    pub batch_max: usize,
    /// Timer trigger period.
    pub flush_interval: Duration,
    /// Overflow bound.
    pub max_buffered: usize,
    /// Feed reconnection behavior.
    pub reconnect: ReconnectConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_max: DEFAULT_BATCH_MAX,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_buffered: DEFAULT_MAX_BUFFERED,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Fatal pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The one-time table setup failed; nothing was ingested.
    #[error("failed to initialize store schema: {0}")]
    SchemaInit(#[source] SinkError),
}

/// What the shutdown sequence did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Outcome of the final flush.
    pub final_flush: FlushOutcome,
    /// Records still buffered when the pipeline stopped.
    pub unflushed: usize,
}

/// The assembled ingestion pipeline.
pub struct Pipeline {
    settings: PipelineSettings,
    schema: Arc<dyn SchemaInitializer>,
    connector: Arc<dyn FeedConnector>,
    decoder: Arc<dyn MessageDecoder>,
    feed_state: Arc<FeedState>,
    scheduler: Arc<FlushScheduler>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Wire the core around the given adapters.
    #[must_use]
    pub fn new(
        settings: PipelineSettings,
        schema: Arc<dyn SchemaInitializer>,
        sink: Arc<dyn BatchSink>,
        connector: Arc<dyn FeedConnector>,
        decoder: Arc<dyn MessageDecoder>,
    ) -> Self {
        let scheduler = Arc::new(FlushScheduler::new(
            Arc::new(BatchBuffer::new()),
            sink,
            OverflowPolicy::new(settings.max_buffered),
            settings.flush_interval,
        ));

        Self {
            settings,
            schema,
            connector,
            decoder,
            feed_state: Arc::new(FeedState::new()),
            scheduler,
            cancel: CancellationToken::new(),
        }
    }

    /// Shared feed connection state.
    #[must_use]
    pub fn feed_state(&self) -> Arc<FeedState> {
        Arc::clone(&self.feed_state)
    }

    /// The flush scheduler.
    #[must_use]
    pub fn scheduler(&self) -> Arc<FlushScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// The batch buffer.
    #[must_use]
    pub fn buffer(&self) -> Arc<BatchBuffer> {
        Arc::clone(self.scheduler.buffer())
    }

    /// Token cancelled when shutdown begins. Cancelling it also starts
    /// the shutdown sequence.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until `shutdown` resolves, then shut down in order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SchemaInit`] if the table cannot be
    /// ensured; no connection is opened in that case.
    pub async fn run<F>(self, shutdown: F) -> Result<ShutdownReport, PipelineError>
    where
        F: Future<Output = ()> + Send,
    {
        tracing::info!("Ensuring destination table exists");
        self.schema
            .ensure_table()
            .await
            .map_err(PipelineError::SchemaInit)?;
        tracing::info!("Destination table ready");

        let flusher = tokio::spawn(Arc::clone(&self.scheduler).run(self.cancel.clone()));

        let consumer = StreamConsumer::new(
            Arc::clone(&self.decoder),
            Arc::clone(&self.scheduler),
            Arc::clone(&self.feed_state),
            self.settings.batch_max,
        );
        let manager = ReconnectManager::new(
            Arc::clone(&self.connector),
            consumer,
            Arc::clone(&self.feed_state),
            self.settings.reconnect,
        );
        let feed = tokio::spawn(manager.run(self.cancel.clone()));

        tracing::info!(
            batch_max = self.settings.batch_max,
            flush_interval_ms = self.settings.flush_interval.as_millis(),
            max_buffered = self.settings.max_buffered,
            "Ingestion started"
        );

        tokio::select! {
            () = shutdown => tracing::info!("Shutdown signal received"),
            () = self.cancel.cancelled() => tracing::info!("Shutdown requested"),
        }

        self.cancel.cancel();

        if let Err(e) = feed.await {
            tracing::error!(error = %e, "Feed task ended abnormally");
        }
        tracing::info!("Feed stopped");

        if let Err(e) = flusher.await {
            tracing::error!(error = %e, "Flush task ended abnormally");
        }

        tracing::info!(buffered = self.scheduler.buffer().len(), "Running final flush");
        let final_flush = self.scheduler.try_flush().await;
        let unflushed = self.scheduler.buffer().len();
        if unflushed > 0 {
            tracing::warn!(unflushed, "Records left unflushed at shutdown");
        }

        tracing::info!("Pipeline stopped");
        Ok(ShutdownReport {
            final_flush,
            unflushed,
        })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("settings", &self.settings)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;
    use crate::application::ports::FeedEvent;
    use crate::application::services::flush::SkipReason;
    use crate::application::services::test_support::{
        RecordingSink, ScriptedConnector, StubSchema,
    };
    use crate::domain::buffer::test_support::records;
    use crate::domain::connection::ConnectionState;
    use crate::infrastructure::binance::TickerCodec;

    fn pipeline(
        schema: Arc<StubSchema>,
        sink: Arc<RecordingSink>,
        connector: Arc<ScriptedConnector>,
    ) -> Pipeline {
        Pipeline::new(
            PipelineSettings::default(),
            schema,
            sink,
            connector,
            Arc::new(TickerCodec::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_runs_exactly_one_final_flush() {
        let sink = Arc::new(RecordingSink::new());
        let connector = Arc::new(ScriptedConnector::new(vec![Ok(Vec::new())]));
        let pipeline = pipeline(Arc::new(StubSchema::ok()), sink.clone(), connector.clone());
        let buffer = pipeline.buffer();
        let feed_state = pipeline.feed_state();
        buffer.append_all(records(0..5));

        let (tx, rx) = oneshot::channel::<()>();
        let run = tokio::spawn(pipeline.run(async move {
            let _ = rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(feed_state.get_state(), ConnectionState::Connected);
        assert_eq!(sink.calls(), 0);

        tx.send(()).unwrap();
        let report = run.await.unwrap().unwrap();

        assert_eq!(report.final_flush, FlushOutcome::Flushed { rows: 5 });
        assert_eq!(report.unflushed, 0);
        assert_eq!(sink.calls(), 1);
        assert_eq!(sink.batches()[0].len(), 5);
        assert_eq!(connector.closed_connections(), 1);
        assert_eq!(feed_state.get_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_with_empty_buffer_skips_write() {
        let sink = Arc::new(RecordingSink::new());
        let connector = Arc::new(ScriptedConnector::new(vec![Ok(Vec::new())]));
        let pipeline = pipeline(Arc::new(StubSchema::ok()), sink.clone(), connector);

        let report = pipeline.run(std::future::ready(())).await.unwrap();

        assert_eq!(report.final_flush, FlushOutcome::Skipped(SkipReason::Empty));
        assert_eq!(sink.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn schema_failure_is_fatal_before_ingestion() {
        let sink = Arc::new(RecordingSink::new());
        let connector = Arc::new(ScriptedConnector::new(vec![Ok(Vec::new())]));
        let schema = Arc::new(StubSchema::failing());
        let pipeline = pipeline(schema.clone(), sink.clone(), connector.clone());

        let err = pipeline.run(std::future::pending()).await.unwrap_err();

        assert!(matches!(err, PipelineError::SchemaInit(_)));
        assert_eq!(schema.calls(), 1);
        assert!(connector.attempts().is_empty());
        assert_eq!(sink.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn feed_messages_flow_to_sink_on_timer() {
        let message = r#"{"stream":"!miniTicker@arr","data":[
            {"E":1700000000999,"s":"BTCUSDT","c":"1","o":"1","h":"1","l":"1"},
            {"E":1700000001000,"s":"ETHUSDT","c":"2","o":"2","h":"2","l":"2"}
        ]}"#;
        let sink = Arc::new(RecordingSink::new());
        let connector = Arc::new(ScriptedConnector::new(vec![Ok(vec![FeedEvent::Message(
            message.to_string(),
        )])]));
        let pipeline = pipeline(Arc::new(StubSchema::ok()), sink.clone(), connector);
        let token = pipeline.shutdown_token();
        let buffer = pipeline.buffer();

        let run = tokio::spawn(pipeline.run(std::future::pending()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(buffer.len(), 2);

        tokio::time::sleep(DEFAULT_FLUSH_INTERVAL).await;
        assert_eq!(sink.calls(), 1);
        let rows = &sink.batches()[0];
        assert_eq!(rows[0].symbol(), "BTCUSDT");
        assert_eq!(rows[1].event_time(), 1_700_000_001);
        assert!(buffer.is_empty());

        token.cancel();
        let report = run.await.unwrap().unwrap();
        assert_eq!(report.final_flush, FlushOutcome::Skipped(SkipReason::Empty));
        assert_eq!(sink.calls(), 1);
    }
}
