//! WebSocket endpoint: upgrade, frame adapters, and the per-connection
//! command loop.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

use mural_core::error::{MuralError, Result};
use mural_core::transport::{Frame, FrameSink, FrameSource, Transport};

use crate::handlers;
use crate::session::NodeSession;
use crate::state::SharedHub;

pub async fn ws_upgrade(
    State(hub): State<SharedHub>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(hub, addr, socket))
}

async fn run_session(hub: SharedHub, addr: SocketAddr, socket: WebSocket) {
    let remote = addr.to_string();
    tracing::info!(%remote, "peer connected");

    let (ws_tx, ws_rx) = socket.split();
    let (transport, mut commands) = Transport::new(
        Box::new(WsSink(ws_tx)),
        Box::new(WsSource(ws_rx)),
    );

    let session = Arc::new(NodeSession::new(remote.clone(), transport));
    hub.insert_session(Arc::clone(&session)).await;
    hub.metrics().sessions_active.inc(&[]);

    // Commands are handled sequentially per connection; responses to our
    // own outbound commands are routed by the transport reader directly.
    while let Some(cmd) = commands.recv().await {
        if let Err(e) = handlers::handle_command(&hub, &session, cmd).await {
            tracing::warn!(%remote, error = %e, "failed to answer command, dropping session");
            break;
        }
    }

    hub.remove_session(&remote).await;
    hub.metrics().sessions_active.dec(&[]);
    tracing::info!(%remote, "peer disconnected");
}

struct WsSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let msg = match frame {
            Frame::Text(s) => Message::Text(s),
            Frame::Binary(b) => Message::Binary(b),
            Frame::Ping(p) => Message::Ping(p),
            Frame::Pong(p) => Message::Pong(p),
            Frame::Close => Message::Close(Some(CloseFrame {
                code: 1000,
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

struct WsSource(SplitStream<WebSocket>);

#[async_trait]
impl FrameSource for WsSource {
    async fn next(&mut self) -> Option<Result<Frame>> {
        match self.0.next().await? {
            Ok(msg) => Some(Ok(match msg {
                Message::Text(s) => Frame::Text(s),
                Message::Binary(b) => Frame::Binary(b),
                Message::Ping(p) => Frame::Ping(p),
                Message::Pong(p) => Frame::Pong(p),
                Message::Close(_) => Frame::Close,
            })),
            Err(e) => Some(Err(MuralError::Transport(e.to_string()))),
        }
    }
}
