//! Framed full-duplex transport.
//!
//! One transport wraps one bidirectional stream and multiplexes
//! unsolicited commands with correlated request/response pairs. On
//! construction it spawns a single reader task; any number of writers
//! serialize through one write lock. Inbound commands land on a bounded
//! queue — a slow consumer blocks the reader, which backpressures the
//! peer through TCP.
//!
//! The stream itself is abstracted behind [`FrameSink`] / [`FrameSource`]
//! so the hub (axum WebSocket), the node, and operator clients
//! (tokio-tungstenite) share the exact same machinery, and tests can run
//! a transport pair over in-memory channels.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::time::timeout;

use crate::error::{MuralError, Result};
use crate::inflight::Inflight;
use crate::protocol::{Command, Message, Response, ResponsePayload};

/// Depth of the inbound command queue.
pub const INCOMING_QUEUE_DEPTH: usize = 5;

/// How long a graceful close waits for the peer to finish the closing
/// handshake before giving up.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

const SHUTDOWN_ERROR: &str = "transport shutting down";
const NOT_ACCEPTING_ERROR: &str = "not accepting commands";

/// One frame off the underlying stream, already stripped of any
/// WebSocket-library specifics.
#[derive(Debug)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Write half of a framed stream.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<()>;
    /// Close the underlying stream (not the protocol-level Close frame).
    async fn close(&mut self) -> Result<()>;
}

/// Read half of a framed stream. `None` means the peer went away.
#[async_trait]
pub trait FrameSource: Send {
    async fn next(&mut self) -> Option<Result<Frame>>;
}

/// A registered single-slot response sink returned by `send_command`.
#[derive(Debug)]
pub struct ResponseSink {
    id: u64,
    rx: oneshot::Receiver<Response>,
}

impl ResponseSink {
    /// The correlation id this sink is waiting on.
    pub fn opaque(&self) -> u64 {
        self.id
    }
}

pub struct Transport {
    writer: Mutex<Box<dyn FrameSink>>,
    inflight: Inflight,
    stopping: RwLock<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl Transport {
    /// Wrap a framed stream. Spawns the reader task and returns the
    /// transport together with the inbound command queue.
    pub fn new(
        writer: Box<dyn FrameSink>,
        reader: Box<dyn FrameSource>,
    ) -> (Arc<Self>, mpsc::Receiver<Command>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(INCOMING_QUEUE_DEPTH);
        let (closed_tx, closed_rx) = watch::channel(false);
        let transport = Arc::new(Self {
            writer: Mutex::new(writer),
            inflight: Inflight::new(),
            stopping: RwLock::new(false),
            closed_rx,
        });
        tokio::spawn(read_loop(Arc::clone(&transport), reader, cmd_tx, closed_tx));
        (transport, cmd_rx)
    }

    pub async fn is_stopping(&self) -> bool {
        *self.stopping.read().await
    }

    async fn enter_stopping(&self) {
        *self.stopping.write().await = true;
    }

    /// Number of outstanding in-flight entries (test observability).
    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    /// Send a command and return the sink its response will arrive on.
    ///
    /// Allocates the opaque id, stamps `submitTime`, and transmits one
    /// frame. On transmit failure the id is unregistered and the error
    /// surfaces.
    pub async fn send_command(&self, mut cmd: Command) -> Result<ResponseSink> {
        // Hold the read guard across the write so a concurrent graceful
        // close waits for in-progress sends before emitting Close.
        let guard = self.stopping.read().await;
        if *guard {
            return Err(MuralError::NotAccepting);
        }
        cmd.submit_time = Some(Utc::now());
        let (id, rx) = self.inflight.register();
        cmd.opaque = id;
        let msg = Message {
            command: Some(cmd),
            response: None,
        };
        if let Err(e) = self.write_message(&msg).await {
            self.inflight.unregister(id);
            return Err(e);
        }
        drop(guard);
        Ok(ResponseSink { id, rx })
    }

    /// Await a sink under a deadline. Expiry unregisters the in-flight
    /// entry, so a late response finds no sink and is dropped with a log.
    pub async fn wait_response(&self, sink: ResponseSink, deadline: Duration) -> Result<Response> {
        let ResponseSink { id, rx } = sink;
        match timeout(deadline, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            // Sink dropped without a value: entry was unregistered.
            Ok(Err(_)) => Err(MuralError::ShuttingDown),
            Err(_) => {
                self.inflight.unregister(id);
                Err(MuralError::Timeout(deadline))
            }
        }
    }

    /// Synchronous send variant: one frame out, one response (or error) in.
    pub async fn send_command_wait(&self, cmd: Command, deadline: Duration) -> Result<Response> {
        let sink = self.send_command(cmd).await?;
        self.wait_response(sink, deadline).await
    }

    /// Emit a response frame echoing `cmd`'s header.
    pub async fn send_response(
        &self,
        payload: Option<ResponsePayload>,
        err: Option<&str>,
        cmd: &Command,
    ) -> Result<()> {
        let resp = Response {
            command: Some(cmd.header()),
            success: err.is_none(),
            error: err.unwrap_or_default().to_string(),
            payload,
            submit_time: Some(Utc::now()),
            arrive_time: None,
        };
        self.write_message(&Message {
            command: None,
            response: Some(resp),
        })
        .await
    }

    async fn write_message(&self, msg: &Message) -> Result<()> {
        let text = serde_json::to_string(msg)
            .map_err(|e| MuralError::Protocol(format!("encode frame: {e}")))?;
        let mut writer = self.writer.lock().await;
        writer.send(Frame::Text(text)).await
    }

    /// Stop accepting outbound commands, emit the protocol Close frame,
    /// and wait for the inbound queue to close (peer finished the
    /// handshake) or for the grace deadline.
    pub async fn graceful_close(&self) -> Result<()> {
        self.enter_stopping().await;
        tracing::debug!("sending close frame");
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.send(Frame::Close).await {
                tracing::debug!("close frame send failed: {e}");
            }
        }
        let mut closed = self.closed_rx.clone();
        let result = timeout(CLOSE_GRACE, closed.wait_for(|c| *c)).await;
        match result {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) | Err(_) => {
                // The peer never finished the handshake; release waiters
                // ourselves so nothing blocks past the grace period.
                self.release_inflight();
                Err(MuralError::Transport(
                    "timed out waiting for transport to close".into(),
                ))
            }
        }
    }

    /// Deliver a synthesized shutdown response to every outstanding sink.
    fn release_inflight(&self) {
        for id in self.inflight.keys() {
            // The entry may have been answered between keys() and here.
            let Some(tx) = self.inflight.take(id) else {
                continue;
            };
            let _ = tx.send(Response {
                command: None,
                success: false,
                error: SHUTDOWN_ERROR.to_string(),
                payload: None,
                submit_time: None,
                arrive_time: Some(Utc::now()),
            });
        }
    }
}

async fn read_loop(
    transport: Arc<Transport>,
    mut reader: Box<dyn FrameSource>,
    cmd_tx: mpsc::Sender<Command>,
    closed_tx: watch::Sender<bool>,
) {
    loop {
        match reader.next().await {
            None => {
                tracing::debug!("peer closed the stream");
                break;
            }
            Some(Err(e)) => {
                tracing::warn!("error reading frame: {e}");
                break;
            }
            Some(Ok(Frame::Close)) => {
                tracing::debug!("normal closure frame received");
                break;
            }
            Some(Ok(Frame::Ping(_))) | Some(Ok(Frame::Pong(_))) => continue,
            Some(Ok(Frame::Binary(_))) => {
                tracing::warn!("unexpected binary frame");
                break;
            }
            Some(Ok(Frame::Text(text))) => {
                let msg: Message = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!("malformed frame: {e}");
                        break;
                    }
                };
                match (msg.command, msg.response) {
                    (Some(cmd), None) => {
                        if !handle_command(&transport, &cmd_tx, cmd).await {
                            break;
                        }
                    }
                    (None, Some(resp)) => handle_response(&transport, resp),
                    _ => {
                        tracing::warn!("frame carries neither command nor response");
                        break;
                    }
                }
            }
        }
    }
    shutdown(&transport, cmd_tx, closed_tx).await;
}

/// Returns false when the reader should terminate.
async fn handle_command(
    transport: &Transport,
    cmd_tx: &mpsc::Sender<Command>,
    mut cmd: Command,
) -> bool {
    cmd.arrive_time = Some(Utc::now());
    if transport.is_stopping().await {
        if let Err(e) = transport.send_response(None, Some(NOT_ACCEPTING_ERROR), &cmd).await {
            tracing::warn!("sending not-accepting response: {e}");
        }
        return true;
    }
    // Blocking here when the queue is full backpressures the peer.
    cmd_tx.send(cmd).await.is_ok()
}

fn handle_response(transport: &Transport, mut resp: Response) {
    resp.arrive_time = Some(Utc::now());
    let Some(opaque) = resp.command.as_ref().map(|c| c.opaque) else {
        tracing::warn!("response frame without command header");
        return;
    };
    match transport.inflight.take(opaque) {
        Some(tx) => {
            if tx.send(resp).is_err() {
                tracing::debug!(opaque, "response waiter already gone");
            }
        }
        None => tracing::warn!(opaque, "no waiter registered for response"),
    }
}

async fn shutdown(
    transport: &Transport,
    cmd_tx: mpsc::Sender<Command>,
    closed_tx: watch::Sender<bool>,
) {
    transport.enter_stopping().await;
    {
        let mut writer = transport.writer.lock().await;
        if let Err(e) = writer.close().await {
            tracing::debug!("closing stream: {e}");
        }
    }
    transport.release_inflight();
    // Dropping the sender closes the inbound queue for the consumer.
    drop(cmd_tx);
    let _ = closed_tx.send(true);
}
