//! Per-connection state on the hub side.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use mural_core::error::{MuralError, Result};
use mural_core::protocol::{Command, Identity, NodeStatus, Response};
use mural_core::transport::Transport;

/// One live connection: its transport, the last observed identity, and
/// when it was observed. Created on accept, destroyed on disconnect,
/// never revived — a reconnect is a new session.
pub struct NodeSession {
    remote_addr: String,
    transport: Arc<Transport>,
    status: Mutex<Option<NodeStatus>>,
}

impl NodeSession {
    pub fn new(remote_addr: String, transport: Arc<Transport>) -> Self {
        Self {
            remote_addr,
            transport,
            status: Mutex::new(None),
        }
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Consistent snapshot of the last observed status.
    pub async fn status(&self) -> Option<NodeStatus> {
        self.status.lock().await.clone()
    }

    pub async fn set_status(&self, status: NodeStatus) {
        *self.status.lock().await = Some(status);
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.status.lock().await.as_ref().map(|s| s.identity.clone())
    }

    /// Send a command to this peer and await its response under a
    /// deadline; an unsuccessful response surfaces as an application
    /// error.
    pub async fn request(&self, cmd: Command, deadline: Duration) -> Result<Response> {
        let resp = self.transport.send_command_wait(cmd, deadline).await?;
        if !resp.success {
            return Err(MuralError::app(resp.error));
        }
        Ok(resp)
    }
}
