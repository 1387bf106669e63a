//! Shared error type across mural crates.

use std::time::Duration;

use thiserror::Error;

/// Shared result type.
pub type Result<T> = std::result::Result<T, MuralError>;

/// Unified error type used by core, hub, node, and operator clients.
///
/// The taxonomy mirrors how failures propagate: transport errors end a
/// session, protocol errors are answered in-band, timeouts release the
/// waiting caller, application errors travel back as `success=false`
/// responses.
#[derive(Debug, Error)]
pub enum MuralError {
    /// Stream read/write failure or protocol-level close gone wrong.
    #[error("transport: {0}")]
    Transport(String),
    /// Malformed frame or payload.
    #[error("protocol: {0}")]
    Protocol(String),
    /// Deadline expired while waiting on a response.
    #[error("timed out after {0:?} waiting for response")]
    Timeout(Duration),
    /// Outbound command rejected because the transport is stopping.
    #[error("transport is stopping and not accepting new outbound commands")]
    NotAccepting,
    /// The transport closed while a response was outstanding.
    #[error("transport shutting down")]
    ShuttingDown,
    /// Domain-level failure reported to the requester.
    #[error("{0}")]
    Application(String),
    /// Invalid or unreadable configuration.
    #[error("config: {0}")]
    Config(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl MuralError {
    /// Application-level error from anything printable.
    pub fn app(msg: impl Into<String>) -> Self {
        MuralError::Application(msg.into())
    }
}
