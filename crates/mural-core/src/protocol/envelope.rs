//! The tagged envelope and per-op payload variants.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use super::types::{b64, FileMap, Identity, ImageData, NodeConfigUpdate, NodeSelector};
use super::types::{FitPolicy, NodeStatus};

/// One wire frame: exactly one of `command` / `response` is populated.
/// A frame with neither (or both) is a protocol error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Command>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
}

/// The closed set of operations peers exchange.
///
/// `Unknown` absorbs unrecognized op strings so a newer peer gets an error
/// response instead of killing the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Op {
    Register,
    Identify,
    ListNodes,
    ShowImages,
    SetImage,
    GetImage,
    ListFiles,
    ConfigSet,
    Unknown,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Register => "register",
            Op::Identify => "identify",
            Op::ListNodes => "listNodes",
            Op::ShowImages => "showImages",
            Op::SetImage => "setImage",
            Op::GetImage => "getImage",
            Op::ListFiles => "listFiles",
            Op::ConfigSet => "configSet",
            Op::Unknown => "unknown",
        }
    }
}

impl From<String> for Op {
    fn from(s: String) -> Op {
        match s.as_str() {
            "register" => Op::Register,
            "identify" => Op::Identify,
            "listNodes" => Op::ListNodes,
            "showImages" => Op::ShowImages,
            "setImage" => Op::SetImage,
            "getImage" => Op::GetImage,
            "listFiles" => Op::ListFiles,
            "configSet" => Op::ConfigSet,
            _ => Op::Unknown,
        }
    }
}

impl From<Op> for String {
    fn from(op: Op) -> String {
        op.as_str().to_string()
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload decoding is lenient: a payload this peer does not recognize
/// (or cannot parse) decodes as `None`, so the handler answers with an
/// error response instead of the reader treating the frame as fatal.
fn lenient_payload<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(d)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// An unsolicited request. `opaque` and `submitTime` are stamped by the
/// sending transport; `arriveTime` by the receiving one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub op: Op,
    #[serde(default)]
    pub opaque: u64,
    #[serde(
        default,
        deserialize_with = "lenient_payload",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<CommandPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrive_time: Option<DateTime<Utc>>,
}

impl Command {
    pub fn new(op: Op, payload: Option<CommandPayload>) -> Self {
        Command {
            op,
            opaque: 0,
            payload,
            submit_time: None,
            arrive_time: None,
        }
    }

    /// Header echoed on the response to carry `opaque` back.
    pub fn header(&self) -> CommandRef {
        CommandRef {
            op: self.op,
            opaque: self.opaque,
        }
    }
}

/// Originating-command header carried on a response. Payloads are never
/// echoed; the echo exists purely to route the response to its waiter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRef {
    pub op: Op,
    #[serde(default)]
    pub opaque: u64,
}

/// The answer to a command. Emitted exactly once per accepted command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandRef>,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(
        default,
        deserialize_with = "lenient_payload",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<ResponsePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrive_time: Option<DateTime<Utc>>,
}

/// Command payloads, one variant per op. `identify` and `listFiles` carry
/// none.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandPayload {
    Register(RegisterPayload),
    ListNodes(ListNodesPayload),
    ShowImages(ShowImagesPayload),
    SetImage(SetImagePayload),
    GetImage(GetImagePayload),
    ConfigSet(ConfigSetPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub identity: Identity,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNodesPayload {
    #[serde(default)]
    pub refresh_identities: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowImagesPayload {
    pub images: Vec<ImageData>,
    #[serde(default)]
    pub fit_policy: FitPolicy,
    #[serde(default)]
    pub must_fit_orientation: bool,
    #[serde(default)]
    pub node_selectors: Vec<NodeSelector>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetImagePayload {
    pub name: String,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saturation: Option<f64>,
    #[serde(default)]
    pub fit_policy: FitPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetImagePayload {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSetPayload {
    pub configs: HashMap<String, NodeConfigUpdate>,
}

/// Response payloads, matching the command variants that return data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponsePayload {
    Identify(IdentifyResponse),
    ListNodes(ListNodesResponse),
    GetImage(GetImageResponse),
    ListFiles(ListFilesResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyResponse {
    pub identity: Identity,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNodesResponse {
    pub nodes: HashMap<String, NodeStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetImageResponse {
    pub name: String,
    #[serde(with = "b64")]
    pub data: Vec<u8>,
    pub hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesResponse {
    pub files: FileMap,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn unknown_op_decodes_without_error() {
        let cmd: Command = serde_json::from_str(r#"{"op":"teleport","opaque":7}"#).unwrap();
        assert_eq!(cmd.op, Op::Unknown);
        assert_eq!(cmd.opaque, 7);
    }

    #[test]
    fn unrecognized_payload_decodes_as_none() {
        // A payload variant this peer does not know must not kill the
        // frame; the handler answers "invalid payload" in-band.
        let cmd: Command = serde_json::from_str(
            r#"{"op":"teleport","opaque":3,"payload":{"teleport":{"to":"mars"}}}"#,
        )
        .unwrap();
        assert_eq!(cmd.op, Op::Unknown);
        assert!(cmd.payload.is_none());

        // Same for a known op with a malformed payload body.
        let cmd: Command =
            serde_json::from_str(r#"{"op":"register","opaque":4,"payload":{"register":{}}}"#)
                .unwrap();
        assert_eq!(cmd.op, Op::Register);
        assert!(cmd.payload.is_none());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let msg: Message = serde_json::from_str(
            r#"{"command":{"op":"identify","opaque":1,"futureField":true},"futureTop":{}}"#,
        )
        .unwrap();
        assert_eq!(msg.command.unwrap().op, Op::Identify);
        assert!(msg.response.is_none());
    }

    #[test]
    fn payload_is_externally_tagged_camel_case() {
        let cmd = Command::new(
            Op::GetImage,
            Some(CommandPayload::GetImage(GetImagePayload {
                name: "sunset.png".into(),
            })),
        );
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains(r#""payload":{"getImage":{"name":"sunset.png"}}"#));
    }

    #[test]
    fn response_echoes_header_only() {
        let mut cmd = Command::new(Op::ListNodes, None);
        cmd.opaque = 42;
        let resp = Response {
            command: Some(cmd.header()),
            success: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""command":{"op":"listNodes","opaque":42}"#));
        assert!(!json.contains("payload\":null"));
    }
}
