//! Mini-Ticker Codec
//!
//! Decodes Binance `24hrMiniTicker` messages into [`NormalizedRecord`]s.
//!
//! # Framing
//!
//! | Shape | Ticks |
//! |---|---|
//! | `[{...}, {...}]` | every element |
//! | `{"stream": ..., "data": [{...}]}` | every element of `data` |
//! | `{"stream": ..., "data": {...}}` | the `data` object |
//! | `{"s": ..., "E": ...}` | the object itself |
//! | any other object (e.g. `{"result":null,"id":1}`) | none |
//!
//! # Tick fields
//!
//! ```json
//! {"e":"24hrMiniTicker","E":1700000000123,"s":"BTCUSDT",
//!  "c":"37000.10","o":"36500.00","h":"37200.00","l":"36400.00",
//!  "v":"1234.5","q":"45678901.2"}
//! ```
//!
//! `s` and `E` are required. Prices are converted leniently: a value that
//! does not parse becomes `NaN`. Volumes that are absent, null, empty or
//! zero become `0`.

use serde_json::{Map, Value};

use crate::application::ports::{CodecError, MessageDecoder};
use crate::domain::record::{NormalizedRecord, RecordFields};

/// JSON codec for the mini-ticker stream.
#[derive(Debug, Default, Clone)]
pub struct TickerCodec;

impl TickerCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text message, preserving tick order.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is not JSON, is framed as neither
    /// array nor object, or any tick lacks a symbol or event time.
    pub fn decode(&self, text: &str) -> Result<Vec<NormalizedRecord>, CodecError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| CodecError::InvalidJson(e.to_string()))?;

        match &value {
            Value::Array(items) => decode_ticks(items),
            Value::Object(object) => match object.get("data") {
                Some(Value::Array(items)) => decode_ticks(items),
                Some(tick @ Value::Object(_)) => decode_ticks(std::slice::from_ref(tick)),
                Some(_) => Err(CodecError::InvalidFraming("data is neither array nor object")),
                None if is_tick(object) => decode_ticks(std::slice::from_ref(&value)),
                None => Ok(Vec::new()),
            },
            _ => Err(CodecError::InvalidFraming("expected array or object")),
        }
    }
}

impl MessageDecoder for TickerCodec {
    fn decode(&self, raw: &str) -> Result<Vec<NormalizedRecord>, CodecError> {
        Self::decode(self, raw)
    }
}

fn is_tick(object: &Map<String, Value>) -> bool {
    object.contains_key("s")
}

fn decode_ticks(items: &[Value]) -> Result<Vec<NormalizedRecord>, CodecError> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(object) => decode_tick(index, object, item),
            _ => Err(CodecError::NotAnObject { index }),
        })
        .collect()
}

fn decode_tick(
    index: usize,
    tick: &Map<String, Value>,
    raw: &Value,
) -> Result<NormalizedRecord, CodecError> {
    let symbol = tick
        .get("s")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingSymbol { index })?
        .to_string();

    let event_time_ms = tick
        .get("E")
        .and_then(event_time_millis)
        .ok_or(CodecError::InvalidEventTime { index })?;

    let fields = RecordFields {
        symbol,
        event_time: event_time_ms.div_euclid(1000),
        close_price: price(tick.get("c")),
        open_price: price(tick.get("o")),
        high_price: price(tick.get("h")),
        low_price: price(tick.get("l")),
        base_volume: volume(tick.get("v")),
        quote_volume: volume(tick.get("q")),
        trade_count: 0,
    };

    // Serializing a Value cannot fail.
    let payload = serde_json::to_string(raw).unwrap_or_default();

    Ok(NormalizedRecord::new(fields, payload))
}

fn event_time_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < 9.0e18)
                .map(|f| {
                    #[allow(clippy::cast_possible_truncation)]
                    let millis = f.floor() as i64;
                    millis
                })
        }),
        _ => None,
    }
}

fn price(value: Option<&Value>) -> f64 {
    value.map_or(f64::NAN, parse_lenient)
}

fn volume(value: Option<&Value>) -> f64 {
    match value {
        None | Some(Value::Null | Value::Bool(false)) => 0.0,
        Some(Value::String(s)) if s.is_empty() => 0.0,
        Some(other) => parse_lenient(other),
    }
}

/// Parse the longest leading decimal number, or `NaN`.
fn parse_lenient(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let s = s.trim_start();
            s.parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .or_else(|| numeric_prefix(s).parse::<f64>().ok())
                .unwrap_or(f64::NAN)
        }
        _ => f64::NAN,
    }
}

fn numeric_prefix(s: &str) -> &str {
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }

    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut valid_end = 0;
    while let Some(&b) = bytes.get(end) {
        match b {
            b'0'..=b'9' => {
                seen_digit = true;
                end += 1;
                valid_end = end;
            }
            b'.' if !seen_dot => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    if !seen_digit {
        return "";
    }

    // Optional exponent, only kept when followed by digits.
    if matches!(bytes.get(valid_end), Some(b'e' | b'E')) {
        let mut exp_end = valid_end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let digits_start = exp_end;
        while matches!(bytes.get(exp_end), Some(b'0'..=b'9')) {
            exp_end += 1;
        }
        if exp_end > digits_start {
            valid_end = exp_end;
        }
    }

    &s[..valid_end]
}
