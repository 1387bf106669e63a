//! Node config loader (strict parsing).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use mural_core::error::{MuralError, Result};
use mural_core::protocol::Orientation;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub version: u32,

    pub node: NodeSection,
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(MuralError::Config(format!(
                "unsupported config version: {}",
                self.version
            )));
        }
        self.node.validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSection {
    /// Operator-assigned name, unique within the fleet.
    pub name: String,

    #[serde(default)]
    pub labels: Vec<String>,

    #[serde(default)]
    pub orientation: Orientation,

    /// Hub address, host:port.
    #[serde(default = "default_hub")]
    pub hub: String,

    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Image cache directory; defaults to `<tmp>/mural-images`.
    #[serde(default)]
    pub image_dir: Option<PathBuf>,

    /// Where the external renderer helper scripts live.
    #[serde(default = "default_script_dir")]
    pub script_dir: PathBuf,

    #[serde(default = "default_register_timeout_ms")]
    pub register_timeout_ms: u64,

    /// Deadline for downloading a missing image from the hub.
    #[serde(default = "default_download_timeout_ms")]
    pub download_timeout_ms: u64,

    /// Fixed pause between reconnect attempts.
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

impl NodeSection {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(MuralError::Config("node.name must not be empty".into()));
        }
        if self.hub.trim().is_empty() {
            return Err(MuralError::Config("node.hub must not be empty".into()));
        }
        if !self.ws_path.starts_with('/') {
            return Err(MuralError::Config("node.ws_path must start with '/'".into()));
        }
        if self.register_timeout_ms == 0 || self.download_timeout_ms == 0 {
            return Err(MuralError::Config("node timeouts must be non-zero".into()));
        }
        Ok(())
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_millis(self.register_timeout_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

fn default_hub() -> String {
    "localhost:8080".into()
}

fn default_ws_path() -> String {
    "/ws".into()
}

fn default_script_dir() -> PathBuf {
    PathBuf::from("/scripts")
}

fn default_register_timeout_ms() -> u64 {
    10_000
}

fn default_download_timeout_ms() -> u64 {
    30_000
}

fn default_reconnect_backoff_ms() -> u64 {
    10_000
}

pub fn load_from_file(path: &Path) -> Result<NodeConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| MuralError::Config(format!("read {}: {e}", path.display())))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<NodeConfig> {
    let cfg: NodeConfig =
        serde_yaml::from_str(s).map_err(|e| MuralError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = load_from_str("version: 1\nnode:\n  name: alpha\n").expect("must parse");
        assert_eq!(cfg.node.hub, "localhost:8080");
        assert_eq!(cfg.node.ws_path, "/ws");
        assert_eq!(cfg.node.orientation, Orientation::ButtonsLeft);
        assert_eq!(cfg.node.reconnect_backoff_ms, 10_000);
    }

    #[test]
    fn empty_name_rejected() {
        assert!(load_from_str("version: 1\nnode:\n  name: \"\"\n").is_err());
    }

    #[test]
    fn unknown_field_rejected() {
        let bad = "version: 1\nnode:\n  name: alpha\n  labls: [a]\n";
        assert!(load_from_str(bad).is_err());
    }
}
