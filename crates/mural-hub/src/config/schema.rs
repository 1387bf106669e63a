use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use mural_core::error::{MuralError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubConfig {
    pub version: u32,

    #[serde(default)]
    pub hub: HubSection,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            version: 1,
            hub: HubSection::default(),
        }
    }
}

impl HubConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(MuralError::Config(format!(
                "unsupported config version: {}",
                self.version
            )));
        }
        self.hub.validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Image cache directory; defaults to `<tmp>/mural-images`.
    #[serde(default)]
    pub image_dir: Option<PathBuf>,

    /// Deadline for `identify`, `configSet`, and `listFiles` fan-out.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Deadline for `setImage` (panel refreshes are slow).
    #[serde(default = "default_set_image_timeout_ms")]
    pub set_image_timeout_ms: u64,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            image_dir: None,
            command_timeout_ms: default_command_timeout_ms(),
            set_image_timeout_ms: default_set_image_timeout_ms(),
        }
    }
}

impl HubSection {
    pub fn validate(&self) -> Result<()> {
        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(MuralError::Config(format!(
                "hub.listen must be a socket address, got {:?}",
                self.listen
            )));
        }
        if self.command_timeout_ms == 0 || self.set_image_timeout_ms == 0 {
            return Err(MuralError::Config("hub timeouts must be non-zero".into()));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn set_image_timeout(&self) -> Duration {
        Duration::from_millis(self.set_image_timeout_ms)
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

fn default_set_image_timeout_ms() -> u64 {
    60_000
}
