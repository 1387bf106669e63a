//! Hub config loader (strict parsing).

pub mod schema;

use std::fs;
use std::path::Path;

use mural_core::error::{MuralError, Result};

pub use schema::{HubConfig, HubSection};

pub fn load_from_file(path: &Path) -> Result<HubConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| MuralError::Config(format!("read {}: {e}", path.display())))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<HubConfig> {
    let cfg: HubConfig =
        serde_yaml::from_str(s).map_err(|e| MuralError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
