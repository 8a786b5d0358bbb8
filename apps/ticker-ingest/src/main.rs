//! Ticker Ingest Binary
//!
//! Starts the mini-ticker collector.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-ingest
//! ```
//!
//! # Environment Variables
//!
//! - `CLICKHOUSE_HOST`: Store HTTP endpoint (default: <http://localhost:8123>)
//! - `CLICKHOUSE_USER` / `CLICKHOUSE_PASS`: Store credentials (default: default / empty)
//! - `CLICKHOUSE_DB` / `CLICKHOUSE_TABLE`: Destination (default: default.market_ticks)
//! - `FEED_URL`: Feed endpoint (default: Binance all-market mini-ticker stream)
//! - `INGEST_BATCH_MAX`: Size trigger (default: 1000)
//! - `INGEST_FLUSH_INTERVAL_MS`: Timer trigger (default: 2000)
//! - `INGEST_MAX_BUFFERED`: Overflow bound (default: 100000)
//! - `INGEST_WRITE_TIMEOUT_SECS`: Store request timeout (default: 20)
//! - `INGEST_RECONNECT_DELAY_MS`: Reconnect delay (default: 2000)
//! - `INGEST_RECONNECT_BACKOFF`: fixed | exponential (default: fixed)
//! - `INGEST_RECONNECT_DELAY_MAX_SECS`: Exponential cap (default: 30)
//! - `INGEST_HEALTH_PORT`: Health and metrics port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Filter directives, replace the default when valid (default: ticker_ingest=info)

use std::sync::Arc;

use anyhow::Context;
use ticker_ingest::infrastructure::health::{HealthServer, HealthServerState};
use ticker_ingest::infrastructure::telemetry;
use ticker_ingest::{
    ClickHouseClient, FlushOutcome, IngestConfig, Pipeline, TickerCodec, WebSocketConnector,
    init_metrics,
};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        tracing::error!(error = %format!("{e:#}"), "Ingester failed");
        eprintln!("ticker-ingest: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("rustls crypto provider already installed"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting ticker ingest");

    let _metrics_handle = init_metrics();

    let config = IngestConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown = install_shutdown_signal().context("installing signal handlers")?;

    let store = Arc::new(ClickHouseClient::new(&config.store).context("building store client")?);
    let pipeline = Pipeline::new(
        config.pipeline_settings(),
        store.clone(),
        store,
        Arc::new(WebSocketConnector::new(config.feed_url.clone())),
        Arc::new(TickerCodec::new()),
    );

    if config.server.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            pipeline.feed_state(),
            pipeline.scheduler(),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            pipeline.shutdown_token(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    let report = pipeline
        .run(shutdown)
        .await
        .context("pipeline failed to start")?;

    match report.final_flush {
        FlushOutcome::Failed { rows, ref reason, .. } => {
            tracing::error!(rows, reason = %reason, "Final flush failed");
        }
        ref outcome => tracing::info!(?outcome, "Final flush complete"),
    }

    tracing::info!(unflushed = report.unflushed, "Ticker ingest stopped");
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &IngestConfig) {
    tracing::info!(
        host = %config.store.host,
        database = %config.store.database,
        table = %config.store.table,
        batch_max = config.batching.batch_max,
        flush_interval_ms = config.batching.flush_interval.as_millis(),
        max_buffered = config.batching.max_buffered,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        feed_url = %config.feed_url,
        reconnect_delay_ms = config.reconnect.delay.as_millis(),
        backoff = config.reconnect.backoff.as_str(),
        "Feed endpoint"
    );
}

/// Register the SIGINT and SIGTERM handlers now and return a future that
/// resolves on the first of them. A signal that arrives before the future
/// is polled is not lost.
#[cfg(unix)]
fn install_shutdown_signal() -> std::io::Result<impl Future<Output = ()> + Send> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => {
                tracing::info!("Received Ctrl+C, initiating shutdown");
            }
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown");
            }
        }
    })
}

#[cfg(not(unix))]
fn install_shutdown_signal() -> std::io::Result<impl Future<Output = ()> + Send> {
    let mut ctrl_c = tokio::signal::windows::ctrl_c()?;

    Ok(async move {
        ctrl_c.recv().await;
        tracing::info!("Received Ctrl+C, initiating shutdown");
    })
}
