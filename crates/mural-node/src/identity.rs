//! Identity assembly: who this node is and what panel it drives.

use mural_core::protocol::{DisplayInfo, Identity, Orientation, Role};

use crate::renderer::DisplayRenderer;

/// Estimated full-refresh duration reported for the attached panel.
const REFRESH_ESTIMATE_MS: u64 = 60_000;

/// Parse the probe helper's `Key: Value` output into display dimensions.
/// Returns (0, 0) when the `Display` line is missing or malformed.
pub fn parse_probe_dimensions(raw: &[u8]) -> (u32, u32) {
    let text = String::from_utf8_lossy(raw);
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim() != "Display" {
            continue;
        }
        let Some((w, h)) = value.split_once('x') else {
            tracing::debug!(value, "display field did not split as expected");
            return (0, 0);
        };
        match (w.trim().parse(), h.trim().parse()) {
            (Ok(w), Ok(h)) => return (w, h),
            _ => {
                tracing::debug!(value, "display dimensions did not parse");
                return (0, 0);
            }
        }
    }
    tracing::debug!("could not find display field in probe output");
    (0, 0)
}

/// Build this node's identity, re-probing the attached display. A failed
/// probe still identifies — the hub just sees no display info.
pub async fn build_identity(
    name: &str,
    labels: &[String],
    orientation: Orientation,
    renderer: &dyn DisplayRenderer,
) -> Identity {
    let (display, display_error) = match renderer.probe().await {
        Ok(raw) => {
            let (width, height) = parse_probe_dimensions(&raw);
            (
                Some(DisplayInfo {
                    responding: true,
                    width,
                    height,
                    refresh_estimate_ms: REFRESH_ESTIMATE_MS,
                    raw,
                }),
                String::new(),
            )
        }
        Err(e) => {
            tracing::warn!("error detecting display: {e}");
            (None, e.to_string())
        }
    };

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();

    Identity {
        name: name.to_string(),
        labels: labels.to_vec(),
        orientation,
        role: Role::Node,
        hostname,
        username: whoami::username(),
        num_cpu: std::thread::available_parallelism().map(usize::from).unwrap_or(1),
        pid: std::process::id(),
        display,
        display_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_display_line() {
        let out = b"Panel: spectra\nDisplay: 800x480\nColour: 7\n";
        assert_eq!(parse_probe_dimensions(out), (800, 480));
    }

    #[test]
    fn tolerates_spaces() {
        assert_eq!(parse_probe_dimensions(b"Display: 1600 x 1200\n"), (1600, 1200));
    }

    #[test]
    fn missing_or_malformed_yields_zero() {
        assert_eq!(parse_probe_dimensions(b"no such field\n"), (0, 0));
        assert_eq!(parse_probe_dimensions(b"Display: widexhigh\n"), (0, 0));
        assert_eq!(parse_probe_dimensions(b"Display: 800\n"), (0, 0));
    }
}
