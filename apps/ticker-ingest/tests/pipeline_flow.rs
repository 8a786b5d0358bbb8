//! End-to-end pipeline tests.
//!
//! A local WebSocket server plays the feed and a wiremock server plays the
//! ClickHouse HTTP interface.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use ticker_ingest::infrastructure::clickhouse::schema;
use ticker_ingest::infrastructure::config::StoreSettings;
use ticker_ingest::{
    ClickHouseClient, ConnectionState, FlushOutcome, Pipeline, PipelineSettings, TickerCodec,
    WebSocketConnector,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const DATABASE: &str = "default";
const TABLE: &str = "market_ticks";

// =============================================================================
// Harness
// =============================================================================

fn tick(symbol: &str, event_time_ms: i64) -> String {
    format!(
        r#"{{"e":"24hrMiniTicker","E":{event_time_ms},"s":"{symbol}","c":"37000.10","o":"36000.00","h":"37500.00","l":"35900.00","v":"1234.5","q":"45678901.2"}}"#
    )
}

fn array_message(symbols: &[&str]) -> String {
    let ticks: Vec<String> = symbols
        .iter()
        .enumerate()
        .map(|(i, s)| tick(s, 1_700_000_000_000 + i64::try_from(i).unwrap()))
        .collect();
    format!("[{}]", ticks.join(","))
}

/// Feed server that sends `message` once, then holds the connection open
/// until the client closes it. `closed` fires when the client is gone.
async fn feed_server(message: String) -> (String, oneshot::Receiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        ws.send(Message::text(message)).await.unwrap();
        while let Some(Ok(frame)) = ws.next().await {
            if frame.is_close() {
                break;
            }
        }
        let _ = closed_tx.send(());
    });

    (format!("ws://{addr}"), closed_rx)
}

async fn store_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(query_param(
            "query",
            schema::create_table_sql(DATABASE, TABLE).as_str(),
        ))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    server
}

fn insert_mock(status: u16) -> Mock {
    Mock::given(method("POST"))
        .and(query_param("query", schema::insert_sql(DATABASE, TABLE).as_str()))
        .respond_with(ResponseTemplate::new(status).set_body_string("store says no"))
}

async fn inserts(server: &MockServer) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|req| {
            req.url
                .query_pairs()
                .any(|(k, v)| k == "query" && v.starts_with("INSERT"))
        })
        .collect()
}

fn body_lines(request: &Request) -> Vec<String> {
    String::from_utf8(request.body.clone())
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

fn pipeline(store: &MockServer, feed_url: String, flush_interval: Duration) -> Pipeline {
    let client = Arc::new(
        ClickHouseClient::new(&StoreSettings {
            host: store.uri(),
            write_timeout: Duration::from_secs(2),
            ..StoreSettings::default()
        })
        .unwrap(),
    );
    Pipeline::new(
        PipelineSettings {
            flush_interval,
            ..PipelineSettings::default()
        },
        client.clone(),
        client,
        Arc::new(WebSocketConnector::new(feed_url)),
        Arc::new(TickerCodec::new()),
    )
}

async fn eventually<F>(what: &str, mut condition: F)
where
    F: AsyncFnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn two_ticks_are_written_in_one_insert_on_timer() {
    let store = store_server().await;
    insert_mock(200).mount(&store).await;
    let (feed_url, _closed) = feed_server(array_message(&["BTCUSDT", "ETHUSDT"])).await;

    let pipeline = pipeline(&store, feed_url, Duration::from_millis(200));
    let buffer = pipeline.buffer();
    let scheduler = pipeline.scheduler();
    let token = pipeline.shutdown_token();
    let run = tokio::spawn(pipeline.run(std::future::pending()));

    eventually("one insert", async || !inserts(&store).await.is_empty()).await;
    eventually("empty buffer", async || buffer.is_empty()).await;

    let requests = inserts(&store).await;
    assert_eq!(requests.len(), 1);
    let lines = body_lines(&requests[0]);
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with(r#"{"symbol":"BTCUSDT","event_time":1700000000,"close_price":37000.1"#));
    assert!(lines[1].starts_with(r#"{"symbol":"ETHUSDT","#));
    assert_eq!(scheduler.rows_written(), 2);

    token.cancel();
    let report = run.await.unwrap().unwrap();
    assert!(!report.final_flush.attempted());
    assert_eq!(inserts(&store).await.len(), 1);
}

#[tokio::test]
async fn failed_insert_is_retried_with_the_same_rows() {
    let store = store_server().await;
    insert_mock(500)
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&store)
        .await;
    insert_mock(200).mount(&store).await;
    let (feed_url, _closed) = feed_server(array_message(&["BTCUSDT", "ETHUSDT"])).await;

    let pipeline = pipeline(&store, feed_url, Duration::from_millis(200));
    let buffer = pipeline.buffer();
    let scheduler = pipeline.scheduler();
    let token = pipeline.shutdown_token();
    let run = tokio::spawn(pipeline.run(std::future::pending()));

    eventually("two inserts", async || inserts(&store).await.len() >= 2).await;
    eventually("empty buffer", async || buffer.is_empty()).await;

    let requests = inserts(&store).await;
    assert_eq!(requests.len(), 2);
    assert_eq!(body_lines(&requests[0]), body_lines(&requests[1]));
    assert_eq!(body_lines(&requests[1]).len(), 2);
    assert_eq!(scheduler.write_attempts(), 2);
    assert_eq!(scheduler.rows_written(), 2);
    assert_eq!(scheduler.consecutive_failures(), 0);
    assert_eq!(scheduler.rows_dropped(), 0);

    token.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_flushes_buffered_rows_once_and_closes_feed() {
    let store = store_server().await;
    insert_mock(200).mount(&store).await;
    let (feed_url, closed) =
        feed_server(array_message(&["BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT", "XRPUSDT"]))
            .await;

    let pipeline = pipeline(&store, feed_url, Duration::from_secs(60));
    let buffer = pipeline.buffer();
    let feed_state = pipeline.feed_state();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(pipeline.run(async move {
        let _ = stop_rx.await;
    }));

    eventually("five buffered records", async || buffer.len() == 5).await;
    assert!(inserts(&store).await.is_empty());

    stop_tx.send(()).unwrap();
    let report = run.await.unwrap().unwrap();

    assert_eq!(report.final_flush, FlushOutcome::Flushed { rows: 5 });
    assert_eq!(report.unflushed, 0);
    let requests = inserts(&store).await;
    assert_eq!(requests.len(), 1);
    assert_eq!(body_lines(&requests[0]).len(), 5);
    assert_eq!(feed_state.get_state(), ConnectionState::Disconnected);
    tokio::time::timeout(Duration::from_secs(2), closed)
        .await
        .expect("feed connection closed")
        .unwrap();
}

#[tokio::test]
async fn schema_failure_stops_before_connecting() {
    let store = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Code: 81. Database missing"))
        .mount(&store)
        .await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let feed_url = format!("ws://{}", listener.local_addr().unwrap());

    let pipeline = pipeline(&store, feed_url, Duration::from_millis(200));
    let feed_state = pipeline.feed_state();
    let err = pipeline.run(std::future::pending()).await.unwrap_err();

    assert!(err.to_string().contains("failed to initialize store schema"));
    assert_eq!(feed_state.get_connect_attempts(), 0);
    let accepted = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
    assert!(accepted.is_err());
}
