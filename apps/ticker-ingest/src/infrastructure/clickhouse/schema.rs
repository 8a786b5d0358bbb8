//! Statements issued against the store.

/// `CREATE TABLE IF NOT EXISTS` for the tick table.
///
/// Ordered by `(symbol, event_time)` with a 30 day retention.
#[must_use]
pub fn create_table_sql(database: &str, table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {database}.{table} (
  symbol String,
  event_time DateTime,
  close_price Float64,
  open_price Float64,
  high_price Float64,
  low_price Float64,
  base_volume Float64,
  quote_volume Float64,
  trade_count UInt32,
  payload String
)
ENGINE = MergeTree()
ORDER BY (symbol, event_time)
TTL event_time + INTERVAL 30 DAY"
    )
}

/// Bulk insert statement; the rows travel in the request body.
#[must_use]
pub fn insert_sql(database: &str, table: &str) -> String {
    format!("INSERT INTO {database}.{table} FORMAT JSONEachRow")
}
