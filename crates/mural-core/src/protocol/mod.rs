//! Wire protocol: the tagged envelope plus the domain types it carries.
//!
//! Every frame is one self-describing JSON object holding either a
//! `command` or a `response`, never both. Keys are lower-camel, unknown
//! keys are ignored on decode, enumerations travel as strings, and binary
//! fields are base64 strings.

pub mod envelope;
pub mod types;

pub use envelope::{
    Command, CommandPayload, CommandRef, ConfigSetPayload, GetImagePayload, GetImageResponse,
    IdentifyResponse, ListFilesResponse, ListNodesPayload, ListNodesResponse, Message, Op,
    RegisterPayload, Response, ResponsePayload, SetImagePayload, ShowImagesPayload,
};
pub use types::{
    DisplayInfo, FileInfo, FileMap, FitPolicy, Identity, ImageData, NodeConfigUpdate,
    NodeSelector, NodeStatus, Orientation, Role, SelectorKey, SelectorLogic, SELF_OWNER,
    SERVER_OWNER,
};
