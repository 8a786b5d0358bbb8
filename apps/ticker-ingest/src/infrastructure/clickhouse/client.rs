//! ClickHouse HTTP client.
//!
//! One `POST /?query=...` per call, basic auth, bounded by the configured
//! timeout. No retries: the flush scheduler owns retry policy.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};

use super::schema;
use crate::application::ports::{BatchSink, SchemaInitializer, SinkError};
use crate::domain::record::NormalizedRecord;
use crate::infrastructure::config::{Credentials, StoreSettings};

const NDJSON: &str = "application/x-ndjson";

/// Writes batches and ensures the table over the ClickHouse HTTP interface.
#[derive(Debug, Clone)]
pub struct ClickHouseClient {
    client: Client,
    endpoint: String,
    credentials: Credentials,
    timeout: Duration,
    create_table_sql: String,
    insert_sql: String,
}

impl ClickHouseClient {
    /// Create a client from store settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &StoreSettings) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(settings.write_timeout)
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/", settings.host.trim_end_matches('/')),
            credentials: settings.credentials.clone(),
            timeout: settings.write_timeout,
            create_table_sql: schema::create_table_sql(&settings.database, &settings.table),
            insert_sql: schema::insert_sql(&settings.database, &settings.table),
        })
    }

    async fn execute(&self, sql: &str, body: Option<String>) -> Result<StatusCode, SinkError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .query(&[("query", sql)])
            .basic_auth(self.credentials.user(), Some(self.credentials.password()));
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, NDJSON).body(body);
        }

        let response = request.send().await.map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(status);
        }

        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Rejected {
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }

    fn transport_error(&self, e: &reqwest::Error) -> SinkError {
        if e.is_timeout() {
            SinkError::Timeout(self.timeout)
        } else {
            SinkError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl BatchSink for ClickHouseClient {
    async fn write_batch(&self, rows: &[NormalizedRecord]) -> Result<(), SinkError> {
        let body = encode_json_each_row(rows)?;
        let status = self.execute(&self.insert_sql, Some(body)).await?;
        tracing::debug!(rows = rows.len(), status = status.as_u16(), "Insert accepted");
        Ok(())
    }
}

#[async_trait]
impl SchemaInitializer for ClickHouseClient {
    async fn ensure_table(&self) -> Result<(), SinkError> {
        self.execute(&self.create_table_sql, None).await?;
        Ok(())
    }
}

/// One JSON object per row, newline separated, in batch order.
///
/// # Errors
///
/// Returns [`SinkError::Encode`] if a row cannot be serialized.
pub fn encode_json_each_row(rows: &[NormalizedRecord]) -> Result<String, SinkError> {
    let lines = rows
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SinkError::Encode(e.to_string()))?;
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::domain::record::RecordFields;

    // base64("default:")
    const DEFAULT_AUTH: &str = "Basic ZGVmYXVsdDo=";

    fn settings(host: &str) -> StoreSettings {
        StoreSettings {
            host: host.to_string(),
            ..StoreSettings::default()
        }
    }

    fn row(symbol: &str, close: f64) -> NormalizedRecord {
        NormalizedRecord::new(
            RecordFields {
                symbol: symbol.to_string(),
                event_time: 1_700_000_000,
                close_price: close,
                open_price: 1.0,
                high_price: 2.0,
                low_price: 0.5,
                base_volume: 10.0,
                quote_volume: 0.0,
                trade_count: 0,
            },
            format!(r#"{{"s":"{symbol}"}}"#),
        )
    }

    #[test]
    fn encodes_rows_as_ndjson_in_order() {
        let body = encode_json_each_row(&[row("BTCUSDT", 1.5), row("ETHUSDT", f64::NAN)]).unwrap();
        let lines: Vec<&str> = body.lines().collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"symbol":"BTCUSDT","event_time":1700000000,"close_price":1.5,"open_price":1.0,"high_price":2.0,"low_price":0.5,"base_volume":10.0,"quote_volume":0.0,"trade_count":0,"payload":"{\"s\":\"BTCUSDT\"}"}"#
        );
        assert!(lines[1].contains(r#""close_price":null"#));
    }

    #[tokio::test]
    async fn write_batch_posts_insert() {
        let server = MockServer::start().await;
        let expected = encode_json_each_row(&[row("BTCUSDT", 1.5), row("ETHUSDT", 2.5)]).unwrap();
        Mock::given(method("POST"))
            .and(path("/"))
            .and(query_param("query", "INSERT INTO default.market_ticks FORMAT JSONEachRow"))
            .and(header("content-type", NDJSON))
            .and(header("authorization", DEFAULT_AUTH))
            .and(body_string(expected))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = ClickHouseClient::new(&settings(&server.uri())).unwrap();
        client
            .write_batch(&[row("BTCUSDT", 1.5), row("ETHUSDT", 2.5)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_rejected_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(500).set_body_string("Code: 241. DB::Exception: Memory limit\n"),
            )
            .mount(&server)
            .await;

        let client = ClickHouseClient::new(&settings(&server.uri())).unwrap();
        let err = client.write_batch(&[row("BTCUSDT", 1.0)]).await.unwrap_err();

        match err {
            SinkError::Rejected { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "Code: 241. DB::Exception: Memory limit");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = ClickHouseClient::new(&StoreSettings {
            write_timeout: Duration::from_millis(50),
            ..settings(&server.uri())
        })
        .unwrap();
        let err = client.write_batch(&[row("BTCUSDT", 1.0)]).await.unwrap_err();

        assert!(matches!(err, SinkError::Timeout(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn unreachable_store_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ClickHouseClient::new(&settings(&format!("http://{addr}"))).unwrap();
        let err = client.write_batch(&[row("BTCUSDT", 1.0)]).await.unwrap_err();

        assert!(matches!(err, SinkError::Transport(_)));
    }

    #[tokio::test]
    async fn ensure_table_posts_ddl() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(query_param(
                "query",
                schema::create_table_sql("markets", "ticks").as_str(),
            ))
            .and(header("authorization", DEFAULT_AUTH))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = ClickHouseClient::new(&StoreSettings {
            database: "markets".to_string(),
            table: "ticks".to_string(),
            ..settings(&format!("{}/", server.uri()))
        })
        .unwrap();

        client.ensure_table().await.unwrap();
    }
}
