//! Outbound WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` bridging a dialed socket onto
//! the shared framed transport. The node runtime and operator clients
//! both connect through here rather than touching tungstenite directly.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use mural_core::error::{MuralError, Result};
use mural_core::protocol::Command;
use mural_core::transport::{Frame, FrameSink, FrameSource, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Dial the hub and wrap the socket in a transport.
pub async fn connect(server: &str, path: &str) -> Result<(Arc<Transport>, mpsc::Receiver<Command>)> {
    let url = format!("ws://{server}{path}");
    tracing::debug!(%url, "dialing hub");
    let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| MuralError::Transport(format!("dial {url}: {e}")))?;
    let (tx, rx) = stream.split();
    Ok(Transport::new(Box::new(WsSink(tx)), Box::new(WsSource(rx))))
}

struct WsSink(SplitSink<WsStream, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let msg = match frame {
            Frame::Text(s) => Message::Text(s),
            Frame::Binary(b) => Message::Binary(b),
            Frame::Ping(p) => Message::Ping(p),
            Frame::Pong(p) => Message::Pong(p),
            Frame::Close => Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            })),
        };
        self.0
            .send(msg)
            .await
            .map_err(|e| MuralError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.0
            .close()
            .await
            .map_err(|e| MuralError::Transport(e.to_string()))
    }
}

struct WsSource(SplitStream<WsStream>);

#[async_trait]
impl FrameSource for WsSource {
    async fn next(&mut self) -> Option<Result<Frame>> {
        loop {
            return match self.0.next().await? {
                Ok(Message::Text(s)) => Some(Ok(Frame::Text(s))),
                Ok(Message::Binary(b)) => Some(Ok(Frame::Binary(b))),
                Ok(Message::Ping(p)) => Some(Ok(Frame::Ping(p))),
                Ok(Message::Pong(p)) => Some(Ok(Frame::Pong(p))),
                Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
                // Raw frames are a tungstenite internal; skip.
                Ok(Message::Frame(_)) => continue,
                Err(e) => Some(Err(MuralError::Transport(e.to_string()))),
            };
        }
    }
}
