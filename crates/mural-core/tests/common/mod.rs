//! In-memory frame plumbing shared by the transport tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use mural_core::error::{MuralError, Result};
use mural_core::protocol::Command;
use mural_core::transport::{Frame, FrameSink, FrameSource, Transport};

pub struct ChannelSink {
    tx: Option<mpsc::Sender<Frame>>,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(frame)
                .await
                .map_err(|_| MuralError::Transport("peer stream closed".into())),
            None => Err(MuralError::Transport("stream already closed".into())),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

pub struct ChannelSource {
    rx: mpsc::Receiver<Frame>,
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next(&mut self) -> Option<Result<Frame>> {
        self.rx.recv().await.map(Ok)
    }
}

pub type Endpoint = (Arc<Transport>, mpsc::Receiver<Command>);

/// Two transports wired back to back over in-memory channels.
pub fn transport_pair() -> (Endpoint, Endpoint) {
    let (a_tx, a_rx) = mpsc::channel(32);
    let (b_tx, b_rx) = mpsc::channel(32);
    let left = Transport::new(
        Box::new(ChannelSink { tx: Some(a_tx) }),
        Box::new(ChannelSource { rx: b_rx }),
    );
    let right = Transport::new(
        Box::new(ChannelSink { tx: Some(b_tx) }),
        Box::new(ChannelSource { rx: a_rx }),
    );
    (left, right)
}

/// One transport with both stream ends held by the test: frames fed via
/// the returned sender, frames written by the transport read via the
/// returned receiver.
pub fn raw_endpoint() -> (Endpoint, mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
    let (in_tx, in_rx) = mpsc::channel(32);
    let (out_tx, out_rx) = mpsc::channel(32);
    let endpoint = Transport::new(
        Box::new(ChannelSink { tx: Some(out_tx) }),
        Box::new(ChannelSource { rx: in_rx }),
    );
    (endpoint, in_tx, out_rx)
}
