//! The node's register-then-serve loop.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use mural_core::cache::ImageCache;
use mural_core::error::{MuralError, Result};
use mural_core::hash;
use mural_core::protocol::{
    Command, CommandPayload, ConfigSetPayload, GetImagePayload, GetImageResponse,
    IdentifyResponse, ListFilesResponse, Op, Orientation, RegisterPayload, ResponsePayload,
    SetImagePayload, SELF_OWNER,
};
use mural_core::transport::Transport;

use crate::config::{NodeConfig, NodeSection};
use crate::identity::build_identity;
use crate::renderer::DisplayRenderer;
use crate::ws;

/// Saturation used when the hub does not specify one.
const DEFAULT_SATURATION: f64 = 0.5;

/// How one connection to the hub ended.
enum SessionEnd {
    Interrupted,
    TransportClosed,
}

/// Dial, register, and serve until interrupted; reconnect with a fixed
/// backoff on any other outcome.
pub async fn run(cfg: NodeConfig, renderer: Arc<dyn DisplayRenderer>) -> Result<()> {
    let mut attempts: u32 = 0;
    loop {
        match run_once(&cfg.node, Arc::clone(&renderer)).await {
            Ok(SessionEnd::Interrupted) => {
                tracing::info!("node shutting down: interrupt");
                return Ok(());
            }
            Ok(SessionEnd::TransportClosed) => {
                tracing::warn!("transport layer closed the connection");
            }
            Err(e) => tracing::warn!("error running node: {e}"),
        }
        attempts += 1;
        let backoff = cfg.node.reconnect_backoff();
        tracing::info!(attempt = attempts, ?backoff, "attempting reconnect");
        tokio::time::sleep(backoff).await;
    }
}

async fn run_once(cfg: &NodeSection, renderer: Arc<dyn DisplayRenderer>) -> Result<SessionEnd> {
    tracing::info!(hub = %cfg.hub, path = %cfg.ws_path, "connecting to hub");
    let (transport, commands) = ws::connect(&cfg.hub, &cfg.ws_path).await?;

    let dir = cfg.image_dir.clone().unwrap_or_else(ImageCache::default_dir);
    let runtime = NodeRuntime {
        inner: Arc::new(RuntimeInner {
            cfg: cfg.clone(),
            state: Mutex::new(NodeState {
                orientation: cfg.orientation,
                labels: cfg.labels.clone(),
            }),
            cache: ImageCache::open(dir)?,
            renderer,
            transport,
        }),
    };

    if let Err(e) = runtime.register().await {
        if let Err(close_err) = runtime.inner.transport.graceful_close().await {
            tracing::debug!("closing connection: {close_err}");
        }
        return Err(MuralError::app(format!("failed to register with hub: {e}")));
    }

    runtime.serve(commands).await
}

#[derive(Clone)]
pub struct NodeRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    cfg: NodeSection,
    /// Orientation and labels are mutable at runtime via `configSet`.
    state: Mutex<NodeState>,
    cache: ImageCache,
    renderer: Arc<dyn DisplayRenderer>,
    transport: Arc<Transport>,
}

struct NodeState {
    orientation: Orientation,
    labels: Vec<String>,
}

impl NodeRuntime {
    async fn serve(&self, mut commands: mpsc::Receiver<Command>) -> Result<SessionEnd> {
        loop {
            tokio::select! {
                maybe = commands.recv() => match maybe {
                    Some(cmd) => {
                        if let Err(e) = self.handle_command(cmd).await {
                            tracing::warn!("error handling incoming command: {e}");
                        }
                    }
                    None => return Ok(SessionEnd::TransportClosed),
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("caught interrupt - gracefully disconnecting");
                    if let Err(e) = self.inner.transport.graceful_close().await {
                        tracing::warn!("websocket close error: {e}");
                    }
                    return Ok(SessionEnd::Interrupted);
                }
            }
        }
    }

    /// Announce this node's identity to the hub.
    pub async fn register(&self) -> Result<()> {
        let identity = self.current_identity().await;
        let cmd = Command::new(
            Op::Register,
            Some(CommandPayload::Register(RegisterPayload { identity })),
        );
        let resp = self
            .inner
            .transport
            .send_command_wait(cmd, self.inner.cfg.register_timeout())
            .await?;
        if !resp.success {
            return Err(MuralError::app(format!(
                "register error returned from hub: {}",
                resp.error
            )));
        }
        Ok(())
    }

    async fn current_identity(&self) -> mural_core::protocol::Identity {
        let (orientation, labels) = {
            let state = self.inner.state.lock().await;
            (state.orientation, state.labels.clone())
        };
        build_identity(&self.inner.cfg.name, &labels, orientation, self.inner.renderer.as_ref())
            .await
    }

    async fn handle_command(&self, cmd: Command) -> Result<()> {
        let result: Result<Option<ResponsePayload>> = match cmd.op {
            Op::Identify => self.handle_identify().await.map(Some),
            Op::SetImage => self.handle_set_image(&cmd).await.map(|_| None),
            Op::ListFiles => self.handle_list_files().map(Some),
            Op::ConfigSet => self.handle_config_set(&cmd).await.map(|_| None),
            other => Err(MuralError::Protocol(format!("unrecognized command: {other}"))),
        };
        let (payload, err) = match result {
            Ok(payload) => (payload, None),
            Err(e) => {
                tracing::warn!(op = %cmd.op, error = %e, "command failed, answering with error");
                (None, Some(e.to_string()))
            }
        };
        self.inner
            .transport
            .send_response(payload, err.as_deref(), &cmd)
            .await
    }

    async fn handle_identify(&self) -> Result<ResponsePayload> {
        let identity = self.current_identity().await;
        Ok(ResponsePayload::Identify(IdentifyResponse { identity }))
    }

    async fn handle_set_image(&self, cmd: &Command) -> Result<()> {
        let Some(CommandPayload::SetImage(payload)) = &cmd.payload else {
            return Err(MuralError::Protocol("invalid set image payload".into()));
        };
        if !self.inner.cache.contains(&payload.name) {
            tracing::info!(name = %payload.name, "image not cached, downloading");
            self.download_image(payload).await?;
        }
        let path = self.inner.cache.path_for(&payload.name)?;
        let rotation = self.inner.state.lock().await.orientation.rotation_degrees();
        self.inner
            .renderer
            .render(
                &path,
                rotation,
                payload.saturation.unwrap_or(DEFAULT_SATURATION),
                payload.fit_policy,
            )
            .await
            .map_err(|e| MuralError::app(format!("running renderer: {e}")))
    }

    async fn download_image(&self, wanted: &SetImagePayload) -> Result<()> {
        let cmd = Command::new(
            Op::GetImage,
            Some(CommandPayload::GetImage(GetImagePayload {
                name: wanted.name.clone(),
            })),
        );
        let resp = self
            .inner
            .transport
            .send_command_wait(cmd, self.inner.cfg.download_timeout())
            .await?;
        if !resp.success {
            return Err(MuralError::app(format!(
                "downloading {}: {}",
                wanted.name, resp.error
            )));
        }
        let Some(ResponsePayload::GetImage(GetImageResponse { data, hash, .. })) = resp.payload
        else {
            return Err(MuralError::Protocol(
                "unexpected payload returned for download image request".into(),
            ));
        };
        if data.is_empty() {
            return Err(MuralError::Protocol("empty image data returned".into()));
        }
        if hash::hash_bytes(&data) != hash {
            return Err(MuralError::app(format!(
                "hash mismatch on downloaded image {}",
                wanted.name
            )));
        }
        self.inner.cache.save(&wanted.name, &data)
    }

    fn handle_list_files(&self) -> Result<ResponsePayload> {
        let files = self.inner.cache.scan()?;
        Ok(ResponsePayload::ListFiles(ListFilesResponse {
            files: HashMap::from([(SELF_OWNER.to_string(), files)]),
        }))
    }

    async fn handle_config_set(&self, cmd: &Command) -> Result<()> {
        let Some(CommandPayload::ConfigSet(ConfigSetPayload { configs })) = &cmd.payload else {
            return Err(MuralError::Protocol("invalid config set payload".into()));
        };
        if configs.len() != 1 {
            return Err(MuralError::app(format!(
                "malformed set config payload: expected exactly 1 entry, got {}",
                configs.len()
            )));
        }
        let Some((name, update)) = configs.iter().next() else {
            return Err(MuralError::app("malformed set config payload"));
        };
        if name != &self.inner.cfg.name {
            return Err(MuralError::app(format!(
                "malformed set config, name does not match: got {name} != want {}",
                self.inner.cfg.name
            )));
        }

        let mut changed = false;
        {
            let mut state = self.inner.state.lock().await;
            if let Some(orientation) = update.orientation {
                if state.orientation != orientation {
                    state.orientation = orientation;
                    changed = true;
                }
            }
            if let Some(labels) = &update.labels {
                if &state.labels != labels {
                    state.labels = labels.clone();
                    changed = true;
                }
            }
        }

        if changed {
            // Re-register asynchronously (the probe can take a while);
            // the hub can assume an eventual update.
            let runtime = self.clone();
            tokio::spawn(async move {
                if let Err(e) = runtime.register().await {
                    tracing::warn!("node unable to re-register after config change: {e}");
                }
            });
        }
        Ok(())
    }
}
