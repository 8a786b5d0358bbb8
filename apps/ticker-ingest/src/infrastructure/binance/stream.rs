//! Feed WebSocket Adapter
//!
//! [`FeedConnector`] over `tokio-tungstenite`. Each connection surfaces the
//! socket as a stream of [`FeedEvent`]s: text and binary frames become
//! messages, pings are answered in place, and a close frame, end of stream
//! or socket error ends the connection.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{FeedConnection, FeedConnector, FeedError, FeedEvent};

/// Default Binance all-market mini-ticker stream.
pub const DEFAULT_FEED_URL: &str = "wss://stream.binance.com:9443/ws/!miniTicker@arr";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections to a fixed feed URL.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Create a connector for `url` (`ws://` or `wss://`).
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The feed URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FeedConnector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn FeedConnection>, FeedError> {
        tracing::info!(url = %self.url, "Connecting to feed");

        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;

        tracing::info!(url = %self.url, "Feed WebSocket open");
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

/// One open feed WebSocket.
pub struct WebSocketConnection {
    stream: WsStream,
}

#[async_trait]
impl FeedConnection for WebSocketConnection {
    async fn next_event(&mut self) -> FeedEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return FeedEvent::Message(text.as_str().to_owned());
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return FeedEvent::Message(text),
                    Err(e) => {
                        tracing::warn!(error = %e, bytes = data.len(), "Dropped non-UTF-8 binary frame");
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return FeedEvent::Error(FeedError::Transport(e.to_string()));
                    }
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()));
                    return FeedEvent::Closed { reason };
                }
                Some(Err(e)) => {
                    return FeedEvent::Error(FeedError::Transport(e.to_string()));
                }
                None => return FeedEvent::Closed { reason: None },
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "Feed close handshake failed");
        }
    }
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection").finish_non_exhaustive()
    }
}
