//! Binance Feed Adapters
//!
//! - **codec**: mini-ticker JSON to [`NormalizedRecord`](crate::domain::record::NormalizedRecord)
//! - **stream**: WebSocket transport implementing the feed ports

pub mod codec;
pub mod stream;

pub use codec::TickerCodec;
pub use stream::{DEFAULT_FEED_URL, WebSocketConnection, WebSocketConnector};
