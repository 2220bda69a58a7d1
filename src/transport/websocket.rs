//! WebSocket transport.
//!
//! Connects to the `ws://…/devtools/browser/…` endpoint the browser
//! announces at startup and exposes the split stream as a
//! [`TransportWriter`] / [`TransportReader`] pair.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error};
use url::Url;

use crate::error::{Error, Result};

use super::{TransportReader, TransportWriter};

// ============================================================================
// Constants
// ============================================================================

/// Timeout for the WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Types
// ============================================================================

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// connect
// ============================================================================

/// Opens a WebSocket to the given DevTools endpoint.
///
/// # Errors
///
/// - [`Error::Config`] if the URL is not a `ws://` or `wss://` URL
/// - [`Error::Connection`] if the handshake times out
/// - [`Error::WebSocket`] if the handshake fails
pub async fn connect(url: &str) -> Result<(WebSocketWriter, WebSocketReader)> {
    let parsed = Url::parse(url).map_err(|e| Error::config(format!("Invalid URL '{url}': {e}")))?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(Error::config(format!(
            "Expected a ws:// or wss:// URL, got '{url}'"
        )));
    }

    let (stream, _response) = timeout(CONNECT_TIMEOUT, connect_async(url))
        .await
        .map_err(|_| {
            Error::connection(format!(
                "WebSocket handshake with {url} timed out after {}ms",
                CONNECT_TIMEOUT.as_millis()
            ))
        })??;

    debug!(%url, "WebSocket connected");

    let (sink, stream) = stream.split();
    Ok((WebSocketWriter { sink }, WebSocketReader { stream }))
}

// ============================================================================
// WebSocketWriter
// ============================================================================

/// Sending half of a WebSocket transport.
pub struct WebSocketWriter {
    sink: SplitSink<Stream, Message>,
}

#[async_trait]
impl TransportWriter for WebSocketWriter {
    async fn send(&mut self, text: String) -> Result<()> {
        self.sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.close().await?;
        Ok(())
    }
}

// ============================================================================
// WebSocketReader
// ============================================================================

/// Receiving half of a WebSocket transport.
pub struct WebSocketReader {
    stream: SplitStream<Stream>,
}

#[async_trait]
impl TransportReader for WebSocketReader {
    async fn receive(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_str().to_owned())),

                Some(Ok(Message::Close(_))) => {
                    debug!("WebSocket closed by remote");
                    return None;
                }

                Some(Err(e)) => {
                    error!(error = %e, "WebSocket error");
                    return Some(Err(e.into()));
                }

                None => {
                    debug!("WebSocket stream ended");
                    return None;
                }

                // Ignore Binary, Ping, Pong, Frame
                Some(Ok(_)) => {}
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
