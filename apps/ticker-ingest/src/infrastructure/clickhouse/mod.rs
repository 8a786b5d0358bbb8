//! ClickHouse Adapters
//!
//! Implements the store ports over the ClickHouse HTTP interface:
//!
//! - `BatchSink`: `INSERT ... FORMAT JSONEachRow` with the batch as body
//! - `SchemaInitializer`: idempotent `CREATE TABLE IF NOT EXISTS`

mod client;
pub mod schema;

pub use client::{ClickHouseClient, encode_json_each_row};
