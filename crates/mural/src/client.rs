//! Operator client: short-lived sessions that issue one request to the
//! hub on behalf of a human and close.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use mural_core::error::{MuralError, Result};
use mural_core::hash;
use mural_core::protocol::{
    Command, CommandPayload, ConfigSetPayload, ImageData, ListFilesResponse, ListNodesPayload,
    ListNodesResponse, NodeConfigUpdate, NodeSelector, Op, Response, ResponsePayload,
    ShowImagesPayload,
};
use mural_core::protocol::FitPolicy;
use mural_core::transport::Transport;

/// Where and how to reach the hub.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub server: String,
    pub ws_path: String,
    /// Outer deadline for the whole request.
    pub timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            server: "localhost:8080".into(),
            ws_path: "/ws".into(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// One open operator connection.
pub struct OperatorSession {
    transport: Arc<Transport>,
    // Held so hub-initiated frames keep draining; operators never receive
    // commands, but the queue must stay open for the close handshake.
    _commands: mpsc::Receiver<Command>,
    timeout: Duration,
}

impl OperatorSession {
    pub async fn connect(opts: &ConnectOptions) -> Result<Self> {
        let (transport, commands) = mural_node::ws::connect(&opts.server, &opts.ws_path).await?;
        Ok(Self {
            transport,
            _commands: commands,
            timeout: opts.timeout,
        })
    }

    /// Send one command and await its response; an unsuccessful response
    /// surfaces as an application error.
    pub async fn request(&self, op: Op, payload: Option<CommandPayload>) -> Result<Response> {
        let resp = self
            .transport
            .send_command_wait(Command::new(op, payload), self.timeout)
            .await?;
        if !resp.success {
            return Err(MuralError::app(format!("error from request: {}", resp.error)));
        }
        Ok(resp)
    }

    pub async fn close(self) {
        if let Err(e) = self.transport.graceful_close().await {
            tracing::debug!("closing websocket: {e}");
        }
    }
}

/// `listNodes`, optionally refreshing identities first.
pub async fn list_nodes(opts: &ConnectOptions, refresh: bool) -> Result<ListNodesResponse> {
    let session = OperatorSession::connect(opts).await?;
    let resp = session
        .request(
            Op::ListNodes,
            Some(CommandPayload::ListNodes(ListNodesPayload {
                refresh_identities: refresh,
            })),
        )
        .await;
    session.close().await;
    match resp?.payload {
        Some(ResponsePayload::ListNodes(nodes)) => Ok(nodes),
        _ => Err(MuralError::Protocol("malformatted response".into())),
    }
}

/// `showImages`: distribute the given images under the given constraints.
pub async fn show_images(
    opts: &ConnectOptions,
    images: Vec<ImageData>,
    fit_policy: FitPolicy,
    must_fit_orientation: bool,
    node_selectors: Vec<NodeSelector>,
) -> Result<()> {
    let session = OperatorSession::connect(opts).await?;
    let resp = session
        .request(
            Op::ShowImages,
            Some(CommandPayload::ShowImages(ShowImagesPayload {
                images,
                fit_policy,
                must_fit_orientation,
                node_selectors,
            })),
        )
        .await;
    session.close().await;
    resp.map(|_| ())
}

/// `configSet`: push an orientation/label update to one named node.
pub async fn config_set(
    opts: &ConnectOptions,
    node: &str,
    update: NodeConfigUpdate,
) -> Result<()> {
    let session = OperatorSession::connect(opts).await?;
    let resp = session
        .request(
            Op::ConfigSet,
            Some(CommandPayload::ConfigSet(ConfigSetPayload {
                configs: std::collections::HashMap::from([(node.to_string(), update)]),
            })),
        )
        .await;
    session.close().await;
    resp.map(|_| ())
}

/// `listFiles`: fleet-wide cache inventory.
pub async fn list_files(opts: &ConnectOptions) -> Result<ListFilesResponse> {
    let session = OperatorSession::connect(opts).await?;
    let resp = session.request(Op::ListFiles, None).await;
    session.close().await;
    match resp?.payload {
        Some(ResponsePayload::ListFiles(files)) => Ok(files),
        _ => Err(MuralError::Protocol("malformatted response".into())),
    }
}

/// Load an image from a local path or an http(s) URL.
pub async fn load_image(origin: &str) -> Result<ImageData> {
    let bytes = if origin.starts_with("http://") || origin.starts_with("https://") {
        fetch_url(origin).await?
    } else {
        std::fs::read(origin)
            .map_err(|e| MuralError::app(format!("unable to read file {origin}: {e}")))?
    };
    let name = base_name(origin);
    let data_hash = hash::hash_bytes(&bytes);
    Ok(ImageData {
        name,
        origin: origin.to_string(),
        hash: data_hash,
        data: bytes,
    })
}

async fn fetch_url(url: &str) -> Result<Vec<u8>> {
    let resp = reqwest::get(url)
        .await
        .map_err(|e| MuralError::app(format!("fetching {url}: {e}")))?;
    if !resp.status().is_success() {
        return Err(MuralError::app(format!("fetching {url}: {}", resp.status())));
    }
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| MuralError::app(format!("reading body of {url}: {e}")))?;
    Ok(bytes.to_vec())
}

/// Last path segment of a path or URL, used as the image name.
fn base_name(origin: &str) -> String {
    let trimmed = origin.trim_end_matches('/');
    let after_slash = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    if after_slash.is_empty() {
        trimmed.to_string()
    } else {
        after_slash.to_string()
    }
}

/// Pretty-print a response payload for stdout.
pub fn render_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| MuralError::Protocol(format!("rendering response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_name_of_paths_and_urls() {
        assert_eq!(base_name("/tmp/images/sunset.png"), "sunset.png");
        assert_eq!(base_name("sunset.png"), "sunset.png");
        assert_eq!(base_name("https://example.com/a/b/dawn.jpg"), "dawn.jpg");
    }
}
