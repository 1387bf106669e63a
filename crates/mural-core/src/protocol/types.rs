//! Domain types carried on the wire.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Base64 adapter for binary fields (JSON carries them as strings).
pub mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// Physical mounting of a display, named for where the panel buttons end
/// up. Equivalent to rotating the canvas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Orientation {
    #[default]
    ButtonsLeft,
    ButtonsUp,
    ButtonsRight,
    ButtonsDown,
}

impl Orientation {
    /// Buttons up/down means the canvas stands tall.
    pub fn is_portrait(self) -> bool {
        matches!(self, Orientation::ButtonsUp | Orientation::ButtonsDown)
    }

    /// Degrees the renderer must rotate the canvas for this mounting.
    pub fn rotation_degrees(self) -> u32 {
        match self {
            Orientation::ButtonsLeft => 0,
            Orientation::ButtonsUp => 90,
            Orientation::ButtonsRight => 180,
            Orientation::ButtonsDown => 270,
        }
    }
}

/// What kind of peer is on the other end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Node,
    Client,
}

/// On-device policy for an image whose shape does not match the panel,
/// or (`mustMatchOrientation`) a placement-time filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FitPolicy {
    #[default]
    CropToFit,
    PadToFit,
    MustMatchOrientation,
}

/// How a selector's verdict combines with the running accumulator.
/// Unrecognized logic folds as AND.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SelectorLogic {
    #[default]
    And,
    Or,
    Unknown,
}

impl From<String> for SelectorLogic {
    fn from(s: String) -> SelectorLogic {
        match s.as_str() {
            "and" => SelectorLogic::And,
            "or" => SelectorLogic::Or,
            _ => SelectorLogic::Unknown,
        }
    }
}

impl From<SelectorLogic> for String {
    fn from(l: SelectorLogic) -> String {
        match l {
            SelectorLogic::And => "and",
            SelectorLogic::Or => "or",
            SelectorLogic::Unknown => "unknown",
        }
        .to_string()
    }
}

/// What a selector tests. An unrecognized key matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SelectorKey {
    Any,
    None,
    NameEquals,
    NameContains,
    HasLabel,
    Unknown,
}

impl From<String> for SelectorKey {
    fn from(s: String) -> SelectorKey {
        match s.as_str() {
            "any" => SelectorKey::Any,
            "none" => SelectorKey::None,
            "nameEquals" => SelectorKey::NameEquals,
            "nameContains" => SelectorKey::NameContains,
            "hasLabel" => SelectorKey::HasLabel,
            _ => SelectorKey::Unknown,
        }
    }
}

impl From<SelectorKey> for String {
    fn from(k: SelectorKey) -> String {
        match k {
            SelectorKey::Any => "any",
            SelectorKey::None => "none",
            SelectorKey::NameEquals => "nameEquals",
            SelectorKey::NameContains => "nameContains",
            SelectorKey::HasLabel => "hasLabel",
            SelectorKey::Unknown => "unknown",
        }
        .to_string()
    }
}

/// One step of a node-selection expression; steps fold left-to-right.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelector {
    #[serde(default)]
    pub logic: SelectorLogic,
    pub key: SelectorKey,
    #[serde(default)]
    pub value: String,
}

/// Result of probing the attached display hardware.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    /// Whether the probe got an answer out of the panel.
    #[serde(default)]
    pub responding: bool,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// Estimated full-refresh duration (e-ink panels are slow).
    #[serde(default)]
    pub refresh_estimate_ms: u64,
    /// Raw probe output, kept for operator debugging.
    #[serde(default, with = "b64", skip_serializing_if = "Vec::is_empty")]
    pub raw: Vec<u8>,
}

/// A peer's self-description, sent at registration and on identify.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Operator-assigned name, unique within the fleet by convention.
    pub name: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub orientation: Orientation,
    pub role: Role,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub num_cpu: usize,
    #[serde(default)]
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplayInfo>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_error: String,
}

impl Identity {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Last known identity of a connected peer plus when it was observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub update_time: DateTime<Utc>,
    pub identity: Identity,
}

/// Per-node configuration pushed by an operator. Absent fields are left
/// untouched on the node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

/// Image bytes in flight, hub-bound or node-bound.
///
/// Invariant: `hash == hex(sha256(data))`; the hash is the cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    pub name: String,
    /// Source path or URL the operator loaded this image from.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub origin: String,
    pub hash: String,
    #[serde(with = "b64")]
    pub data: Vec<u8>,
}

/// One cached file as reported by `listFiles`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    /// Unix permission bits (zero where the platform has none).
    pub mode: u32,
    pub mod_time: DateTime<Utc>,
    pub hash: String,
}

/// Owner label used by a node for its own `listFiles` map entry; the hub
/// re-keys it by remote address before answering the operator.
pub const SELF_OWNER: &str = "self";

/// Owner label the hub uses for its own cache in `listFiles` answers.
pub const SERVER_OWNER: &str = "server";

/// `listFiles` result shape shared by hub and node.
pub type FileMap = HashMap<String, Vec<FileInfo>>;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn orientation_partition() {
        assert!(Orientation::ButtonsUp.is_portrait());
        assert!(Orientation::ButtonsDown.is_portrait());
        assert!(!Orientation::ButtonsLeft.is_portrait());
        assert!(!Orientation::ButtonsRight.is_portrait());
    }

    #[test]
    fn orientation_rotation() {
        assert_eq!(Orientation::ButtonsLeft.rotation_degrees(), 0);
        assert_eq!(Orientation::ButtonsUp.rotation_degrees(), 90);
        assert_eq!(Orientation::ButtonsRight.rotation_degrees(), 180);
        assert_eq!(Orientation::ButtonsDown.rotation_degrees(), 270);
    }

    #[test]
    fn unknown_selector_key_decodes_leniently() {
        let sel: NodeSelector =
            serde_json::from_str(r#"{"logic":"nand","key":"hasShield","value":"x"}"#).unwrap();
        assert_eq!(sel.logic, SelectorLogic::Unknown);
        assert_eq!(sel.key, SelectorKey::Unknown);
    }

    #[test]
    fn image_data_base64_round_trip() {
        let img = ImageData {
            name: "a.png".into(),
            origin: String::new(),
            hash: "00".into(),
            data: vec![0, 1, 2, 255],
        };
        let json = serde_json::to_string(&img).unwrap();
        assert!(json.contains("\"data\":\"AAEC/w==\""));
        let back: ImageData = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data, img.data);
    }
}
