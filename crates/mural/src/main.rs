//! mural CLI: run the hub, run a node, or issue operator requests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use mural::client::{self, ConnectOptions};
use mural_core::protocol::{
    FitPolicy, NodeConfigUpdate, NodeSelector, Orientation, SelectorKey, SelectorLogic,
};
use mural_node::renderer::SubprocessRenderer;

#[derive(Parser)]
#[command(name = "mural", version, about = "Fleet controller for networked display nodes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hub process
    Server {
        #[command(subcommand)]
        command: ServerCommands,
    },
    /// Display node process and fleet queries
    Node {
        #[command(subcommand)]
        command: NodeCommands,
    },
    /// Distribute images and display them across the fleet
    Show {
        /// Image paths or http(s) URLs; the last image is the primary one
        #[arg(required = true)]
        images: Vec<String>,
        /// Display on the node with this exact name
        #[arg(long, short)]
        node: Option<String>,
        /// Display on nodes carrying this label (repeatable)
        #[arg(long)]
        label: Vec<String>,
        /// On-device policy for shape mismatches
        #[arg(long, value_enum, default_value = "crop")]
        fit: FitArg,
        /// Skip images whose orientation no connected display matches
        #[arg(long)]
        must_fit: bool,
        #[command(flatten)]
        conn: ConnArgs,
    },
    /// Push configuration to nodes
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Cached-file inventory
    Filesystem {
        #[command(subcommand)]
        command: FilesystemCommands,
    },
}

#[derive(Subcommand)]
enum ServerCommands {
    /// Run the hub
    Start {
        /// Hub config file (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum NodeCommands {
    /// Run a display node
    Start {
        /// Node config file
        #[arg(long)]
        config: PathBuf,
    },
    /// List nodes connected to the hub
    List {
        /// Re-identify all connected nodes instead of returning hub state
        #[arg(long, short)]
        refresh: bool,
        #[command(flatten)]
        conn: ConnArgs,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Set orientation and labels on a named node
    Set {
        /// Target node name
        #[arg(long)]
        node: String,
        #[arg(long, value_enum)]
        orientation: Option<OrientationArg>,
        /// Replacement label set (repeatable)
        #[arg(long)]
        label: Vec<String>,
        #[command(flatten)]
        conn: ConnArgs,
    },
}

#[derive(Subcommand)]
enum FilesystemCommands {
    /// Enumerate cached files fleet-wide
    List {
        #[command(flatten)]
        conn: ConnArgs,
    },
}

#[derive(Args)]
struct ConnArgs {
    /// Hub address, host:port
    #[arg(long, default_value = "localhost:8080")]
    server: String,
    /// WebSocket upgrade path on the hub
    #[arg(long, default_value = "/ws")]
    ws_path: String,
    /// Request deadline in seconds
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

impl From<ConnArgs> for ConnectOptions {
    fn from(args: ConnArgs) -> Self {
        ConnectOptions {
            server: args.server,
            ws_path: args.ws_path,
            timeout: Duration::from_secs(args.timeout_secs),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FitArg {
    Crop,
    Pad,
}

impl From<FitArg> for FitPolicy {
    fn from(fit: FitArg) -> Self {
        match fit {
            FitArg::Crop => FitPolicy::CropToFit,
            FitArg::Pad => FitPolicy::PadToFit,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OrientationArg {
    ButtonsLeft,
    ButtonsUp,
    ButtonsRight,
    ButtonsDown,
}

impl From<OrientationArg> for Orientation {
    fn from(o: OrientationArg) -> Self {
        match o {
            OrientationArg::ButtonsLeft => Orientation::ButtonsLeft,
            OrientationArg::ButtonsUp => Orientation::ButtonsUp,
            OrientationArg::ButtonsRight => Orientation::ButtonsRight,
            OrientationArg::ButtonsDown => Orientation::ButtonsDown,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match Cli::parse().command {
        Commands::Server {
            command: ServerCommands::Start { config },
        } => {
            let cfg = match config {
                Some(path) => mural_hub::config::load_from_file(&path)?,
                None => mural_hub::config::HubConfig::default(),
            };
            mural_hub::router::serve(cfg).await?;
        }
        Commands::Node {
            command: NodeCommands::Start { config },
        } => {
            let cfg = mural_node::config::load_from_file(&config)?;
            let renderer = Arc::new(SubprocessRenderer::new(cfg.node.script_dir.clone()));
            mural_node::runtime::run(cfg, renderer).await?;
        }
        Commands::Node {
            command: NodeCommands::List { refresh, conn },
        } => {
            let nodes = client::list_nodes(&conn.into(), refresh).await?;
            println!("{}", client::render_json(&nodes)?);
        }
        Commands::Show {
            images,
            node,
            label,
            fit,
            must_fit,
            conn,
        } => {
            let mut loaded = Vec::with_capacity(images.len());
            for origin in &images {
                loaded.push(
                    client::load_image(origin)
                        .await
                        .with_context(|| format!("loading {origin}"))?,
                );
            }
            let mut selectors = Vec::new();
            if let Some(name) = node {
                selectors.push(NodeSelector {
                    logic: SelectorLogic::And,
                    key: SelectorKey::NameEquals,
                    value: name,
                });
            }
            for value in label {
                selectors.push(NodeSelector {
                    logic: SelectorLogic::And,
                    key: SelectorKey::HasLabel,
                    value,
                });
            }
            client::show_images(&conn.into(), loaded, fit.into(), must_fit, selectors).await?;
            println!("success");
        }
        Commands::Config {
            command:
                ConfigCommands::Set {
                    node,
                    orientation,
                    label,
                    conn,
                },
        } => {
            let update = NodeConfigUpdate {
                orientation: orientation.map(Into::into),
                labels: if label.is_empty() { None } else { Some(label) },
            };
            client::config_set(&conn.into(), &node, update).await?;
            println!("success");
        }
        Commands::Filesystem {
            command: FilesystemCommands::List { conn },
        } => {
            let files = client::list_files(&conn.into()).await?;
            println!("{}", client::render_json(&files)?);
        }
    }
    Ok(())
}
