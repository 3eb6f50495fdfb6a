//! WebSocket adapters for the server (axum) and client (tungstenite) sides

use async_trait::async_trait;
use axum::extract::ws::{Message as AxumMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, WebSocketStream};
use url::Url;

use spectre_core::ConnectionError;
use spectre_protocol::ProtocolError;

use super::{BoxedSink, BoxedStream, FrameSink, FrameStream};
use crate::error::ChannelError;

/// Split an upgraded server-side socket into channel halves
pub fn axum_socket(socket: WebSocket) -> (BoxedSink, BoxedStream) {
    let (sink, stream) = socket.split();
    (Box::new(AxumSink(sink)), Box::new(AxumStream(stream)))
}

/// Split a client-side socket into channel halves
pub fn client_socket<S>(socket: WebSocketStream<S>) -> (BoxedSink, BoxedStream)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = socket.split();
    (Box::new(ClientSink(sink)), Box::new(ClientStream(stream)))
}

/// Dial `url` and complete the WebSocket upgrade
pub async fn connect(url: &Url) -> Result<(BoxedSink, BoxedStream), ConnectionError> {
    let (socket, response) = connect_async(url.as_str())
        .await
        .map_err(|e| ConnectionError::ConnectionRefused(e.to_string()))?;
    tracing::debug!(
        "WebSocket upgrade to {} returned {}",
        url.host_str().unwrap_or(""),
        response.status()
    );
    Ok(client_socket(socket))
}

fn binary_text(bytes: Vec<u8>) -> Result<String, ChannelError> {
    String::from_utf8(bytes).map_err(|_| ChannelError::Protocol(ProtocolError::InvalidUtf8))
}

struct AxumSink(SplitSink<WebSocket, AxumMessage>);

#[async_trait]
impl FrameSink for AxumSink {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        self.0
            .send(AxumMessage::Text(text))
            .await
            .map_err(ChannelError::transport)
    }

    async fn close(&mut self) {
        if let Err(e) = self.0.close().await {
            tracing::trace!("WebSocket close failed: {}", e);
        }
    }
}

struct AxumStream(SplitStream<WebSocket>);

#[async_trait]
impl FrameStream for AxumStream {
    async fn next_text(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            match self.0.next().await? {
                Ok(AxumMessage::Text(text)) => return Some(Ok(text)),
                Ok(AxumMessage::Binary(bytes)) => return Some(binary_text(bytes)),
                Ok(AxumMessage::Close(_)) => return None,
                Ok(AxumMessage::Ping(_)) | Ok(AxumMessage::Pong(_)) => continue,
                Err(e) => return Some(Err(ChannelError::transport(e))),
            }
        }
    }
}

struct ClientSink<S>(SplitSink<WebSocketStream<S>, WsMessage>);

#[async_trait]
impl<S> FrameSink for ClientSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        self.0
            .send(WsMessage::Text(text))
            .await
            .map_err(ChannelError::transport)
    }

    async fn close(&mut self) {
        if let Err(e) = self.0.close().await {
            tracing::trace!("WebSocket close failed: {}", e);
        }
    }
}

struct ClientStream<S>(SplitStream<WebSocketStream<S>>);

#[async_trait]
impl<S> FrameStream for ClientStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn next_text(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            match self.0.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text)),
                Ok(WsMessage::Binary(bytes)) => return Some(binary_text(bytes)),
                Ok(WsMessage::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(ChannelError::transport(e))),
            }
        }
    }
}
