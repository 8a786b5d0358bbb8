//! Normalized Tick Records
//!
//! The fixed row schema every feed event is normalized into before it is
//! buffered and written to the store.
//!
//! Field names double as the store's column names: the `Serialize` impl
//! produces exactly one `JSONEachRow` object per record.

use serde::Serialize;

/// One immutable row produced from a single raw feed tick.
///
/// Fields are private and only readable through accessors, so a record
/// cannot change after it has been appended to the buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    symbol: String,
    event_time: i64,
    close_price: f64,
    open_price: f64,
    high_price: f64,
    low_price: f64,
    base_volume: f64,
    quote_volume: f64,
    trade_count: u32,
    #[serde(rename = "payload")]
    raw_payload: String,
}

/// Builder-style input for [`NormalizedRecord::new`].
///
/// Prices and volumes are taken as already converted; a conversion that
/// failed upstream is carried as `f64::NAN`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFields {
    /// Instrument symbol, e.g. `BTCUSDT`.
    pub symbol: String,
    /// Event time in epoch seconds.
    pub event_time: i64,
    /// Close (last) price.
    pub close_price: f64,
    /// Open price.
    pub open_price: f64,
    /// High price.
    pub high_price: f64,
    /// Low price.
    pub low_price: f64,
    /// Base asset volume.
    pub base_volume: f64,
    /// Quote asset volume.
    pub quote_volume: f64,
    /// Number of trades; the mini-ticker feed never supplies it.
    pub trade_count: u32,
}

impl NormalizedRecord {
    /// Create a record from converted fields and the original tick text.
    #[must_use]
    pub fn new(fields: RecordFields, raw_payload: String) -> Self {
        Self {
            symbol: fields.symbol,
            event_time: fields.event_time,
            close_price: fields.close_price,
            open_price: fields.open_price,
            high_price: fields.high_price,
            low_price: fields.low_price,
            base_volume: fields.base_volume,
            quote_volume: fields.quote_volume,
            trade_count: fields.trade_count,
            raw_payload,
        }
    }

    /// Instrument symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Event time in epoch seconds.
    #[must_use]
    pub const fn event_time(&self) -> i64 {
        self.event_time
    }

    /// Close price.
    #[must_use]
    pub const fn close_price(&self) -> f64 {
        self.close_price
    }

    /// Open price.
    #[must_use]
    pub const fn open_price(&self) -> f64 {
        self.open_price
    }

    /// High price.
    #[must_use]
    pub const fn high_price(&self) -> f64 {
        self.high_price
    }

    /// Low price.
    #[must_use]
    pub const fn low_price(&self) -> f64 {
        self.low_price
    }

    /// Base asset volume.
    #[must_use]
    pub const fn base_volume(&self) -> f64 {
        self.base_volume
    }

    /// Quote asset volume.
    #[must_use]
    pub const fn quote_volume(&self) -> f64 {
        self.quote_volume
    }

    /// Trade count (always 0 for the mini-ticker stream).
    #[must_use]
    pub const fn trade_count(&self) -> u32 {
        self.trade_count
    }

    /// The original tick object, serialized.
    #[must_use]
    pub fn raw_payload(&self) -> &str {
        &self.raw_payload
    }

    /// Whether any price or volume carries the not-a-number sentinel.
    #[must_use]
    pub fn has_conversion_anomaly(&self) -> bool {
        [
            self.close_price,
            self.open_price,
            self.high_price,
            self.low_price,
            self.base_volume,
            self.quote_volume,
        ]
        .iter()
        .any(|v| v.is_nan())
    }
}
