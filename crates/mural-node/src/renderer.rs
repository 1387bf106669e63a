//! The seam to the external display helper.
//!
//! Probing the panel and painting an image both shell out to helper
//! scripts shipped alongside the node (e-ink vendors only publish Python
//! drivers). Everything above this module talks to the trait, so tests
//! can run a whole node without hardware.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use mural_core::error::{MuralError, Result};
use mural_core::protocol::FitPolicy;

#[async_trait]
pub trait DisplayRenderer: Send + Sync {
    /// Probe the attached display; returns the helper's raw output.
    async fn probe(&self) -> Result<Vec<u8>>;

    /// Paint the image at `path` with the given rotation, saturation, and
    /// fit policy.
    async fn render(
        &self,
        path: &Path,
        rotation_deg: u32,
        saturation: f64,
        fit: FitPolicy,
    ) -> Result<()>;
}

fn fit_arg(fit: FitPolicy) -> &'static str {
    match fit {
        FitPolicy::CropToFit => "crop",
        FitPolicy::PadToFit => "pad",
        FitPolicy::MustMatchOrientation => "match",
    }
}

/// Production renderer: invokes the helper scripts under `script_dir`.
pub struct SubprocessRenderer {
    script_dir: PathBuf,
}

impl SubprocessRenderer {
    pub fn new(script_dir: PathBuf) -> Self {
        Self { script_dir }
    }

    async fn run(&self, script: &str, args: &[String]) -> Result<Vec<u8>> {
        let script_path = self.script_dir.join(script);
        tracing::debug!(script = %script_path.display(), ?args, "running helper");
        let output = Command::new("python3")
            .arg(&script_path)
            .args(args)
            .output()
            .await
            .map_err(|e| MuralError::app(format!("spawning {script}: {e}")))?;
        if !output.status.success() {
            return Err(MuralError::app(format!(
                "{script} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl DisplayRenderer for SubprocessRenderer {
    async fn probe(&self) -> Result<Vec<u8>> {
        self.run("identify.py", &[]).await
    }

    async fn render(
        &self,
        path: &Path,
        rotation_deg: u32,
        saturation: f64,
        fit: FitPolicy,
    ) -> Result<()> {
        let args = vec![
            "--image".to_string(),
            path.display().to_string(),
            "--rotate".to_string(),
            rotation_deg.to_string(),
            "--saturation".to_string(),
            saturation.to_string(),
            "--fit".to_string(),
            fit_arg(fit).to_string(),
        ];
        self.run("paint.py", &args).await?;
        Ok(())
    }
}
