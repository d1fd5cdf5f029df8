//! Transport seam for the tracking feed.
//!
//! A [`Transport`] opens one receive-only connection and yields the payload
//! of each data frame. The stream ending means the peer closed; an `Err` item means the
//! connection broke. Dropping the stream closes the connection.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;

/// Inbound frame payloads of one open connection. Text and binary frames
/// both arrive as raw bytes; the decoder owns UTF-8 validation.
pub type FrameStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Complete the handshake with `url` and return its frame stream.
    async fn open(&self, url: &str) -> Result<FrameStream, TransportError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("connection error: {0}")]
    Connection(String),
}

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &str) -> Result<FrameStream, TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let frames = ws
            .take_while(|msg| {
                let open = !matches!(
                    msg,
                    Ok(Message::Close(_)) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed)
                );
                async move { open }
            })
            .filter_map(|msg| async move {
                match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.into_bytes())),
                    Ok(Message::Binary(bytes)) => Some(Ok(bytes)),
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::Connection(e.to_string()))),
                }
            });

        Ok(frames.boxed())
    }
}
