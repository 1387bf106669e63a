//! Per-op command dispatch for connections into the hub.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;

use mural_core::error::{MuralError, Result};
use mural_core::protocol::{
    Command, CommandPayload, ConfigSetPayload, GetImageResponse, IdentifyResponse,
    ListFilesResponse, ListNodesResponse, NodeStatus, Op, Response, ResponsePayload, Role,
    SERVER_OWNER,
};

use crate::placement;
use crate::session::NodeSession;
use crate::state::Hub;

/// Dispatch one inbound command and answer it. Returns an error only when
/// the response itself could not be sent (which ends the session).
pub async fn handle_command(hub: &Arc<Hub>, session: &Arc<NodeSession>, cmd: Command) -> Result<()> {
    let result: Result<Option<ResponsePayload>> = match cmd.op {
        Op::Register => register(session, &cmd).await.map(|_| None),
        Op::ListNodes => list_nodes(hub, &cmd).await.map(Some),
        Op::ShowImages => placement::show_images(hub, &cmd).await.map(|_| None),
        Op::GetImage => get_image(hub, &cmd).map(Some),
        Op::ListFiles => list_files(hub).await.map(Some),
        Op::ConfigSet => config_set(hub, &cmd).await.map(|_| None),
        other => Err(MuralError::Protocol(format!("unrecognized command: {other}"))),
    };

    let outcome = if result.is_ok() { "ok" } else { "error" };
    hub.metrics()
        .commands
        .inc(&[("op", cmd.op.as_str()), ("outcome", outcome)]);

    let (payload, err) = match result {
        Ok(payload) => (payload, None),
        Err(e) => {
            tracing::warn!(op = %cmd.op, error = %e, "command failed");
            (None, Some(e.to_string()))
        }
    };
    session
        .transport()
        .send_response(payload, err.as_deref(), &cmd)
        .await
}

/// `register`: stamp this session's status with the embedded identity and
/// the command's arrival time.
async fn register(session: &Arc<NodeSession>, cmd: &Command) -> Result<()> {
    let Some(CommandPayload::Register(payload)) = &cmd.payload else {
        return Err(MuralError::Protocol("invalid register payload".into()));
    };
    let update_time = cmd.arrive_time.unwrap_or_else(Utc::now);
    tracing::info!(
        name = %payload.identity.name,
        addr = session.remote_addr(),
        "peer registered"
    );
    session
        .set_status(NodeStatus {
            update_time,
            identity: payload.identity.clone(),
        })
        .await;
    Ok(())
}

/// `listNodes`: optionally re-identify every role-node session, then
/// snapshot all statuses into a remote-address-keyed map.
async fn list_nodes(hub: &Arc<Hub>, cmd: &Command) -> Result<ResponsePayload> {
    let refresh = match &cmd.payload {
        Some(CommandPayload::ListNodes(p)) => p.refresh_identities,
        _ => false,
    };

    if refresh {
        for session in hub.snapshot_by_role(Role::Node).await {
            tracing::debug!(addr = session.remote_addr(), "refreshing identity");
            if let Err(e) = refresh_identity(hub, &session).await {
                // A dead node keeps its previous status; the refresh moves on.
                tracing::warn!(addr = session.remote_addr(), error = %e, "identify failed");
            }
        }
    }

    let mut nodes = HashMap::new();
    for session in hub.snapshot().await {
        if let Some(status) = session.status().await {
            nodes.insert(session.remote_addr().to_string(), status);
        }
    }
    Ok(ResponsePayload::ListNodes(ListNodesResponse { nodes }))
}

async fn refresh_identity(hub: &Arc<Hub>, session: &Arc<NodeSession>) -> Result<()> {
    let cmd = Command::new(Op::Identify, None);
    let resp = session.request(cmd, hub.cfg().hub.command_timeout()).await?;
    let status = identify_status(&resp)?;
    session.set_status(status).await;
    Ok(())
}

fn identify_status(resp: &Response) -> Result<NodeStatus> {
    let Some(ResponsePayload::Identify(IdentifyResponse { identity })) = &resp.payload else {
        return Err(MuralError::Protocol("identify response payload is empty".into()));
    };
    let Some(update_time) = resp.arrive_time else {
        return Err(MuralError::Protocol("malformed response - arrival time unset".into()));
    };
    Ok(NodeStatus {
        update_time,
        identity: identity.clone(),
    })
}

/// `configSet`: forward each named config to the matching node.
async fn config_set(hub: &Arc<Hub>, cmd: &Command) -> Result<()> {
    let Some(CommandPayload::ConfigSet(payload)) = &cmd.payload else {
        return Err(MuralError::Protocol("invalid config set payload".into()));
    };

    for (name, config) in &payload.configs {
        let Some(session) = hub.session_by_name(name).await else {
            return Err(MuralError::app(format!(
                "could not find connected node with name {name}"
            )));
        };
        let forward = Command::new(
            Op::ConfigSet,
            Some(CommandPayload::ConfigSet(ConfigSetPayload {
                configs: HashMap::from([(name.clone(), config.clone())]),
            })),
        );
        session
            .request(forward, hub.cfg().hub.command_timeout())
            .await
            .map_err(|e| MuralError::app(format!("unable to set config on node {name}: {e}")))?;
    }
    Ok(())
}

/// `listFiles`: the hub's own cache plus a parallel fan-out to every
/// role-node session. Nodes label their map entry "self"; the hub re-keys
/// it by remote address.
async fn list_files(hub: &Arc<Hub>) -> Result<ResponsePayload> {
    let mut files = HashMap::new();
    files.insert(SERVER_OWNER.to_string(), hub.cache().scan()?);

    let sessions = hub.snapshot_by_role(Role::Node).await;
    let queries = sessions.iter().map(|session| async move {
        let cmd = Command::new(Op::ListFiles, None);
        let resp = session
            .request(cmd, hub.cfg().hub.command_timeout())
            .await
            .map_err(|e| {
                MuralError::app(format!(
                    "unable to list files on node {}: {e}",
                    session.remote_addr()
                ))
            })?;
        let Some(ResponsePayload::ListFiles(ListFilesResponse { files: reported })) = resp.payload
        else {
            return Err(MuralError::Protocol(format!(
                "invalid list files payload returned from {}",
                session.remote_addr()
            )));
        };
        if reported.len() != 1 {
            return Err(MuralError::Protocol(format!(
                "expected 1 map entry in response from node but got {}",
                reported.len()
            )));
        }
        let node_files = reported.into_values().next().unwrap_or_default();
        Ok((session.remote_addr().to_string(), node_files))
    });

    for result in join_all(queries).await {
        let (owner, node_files) = result?;
        files.insert(owner, node_files);
    }

    Ok(ResponsePayload::ListFiles(ListFilesResponse { files }))
}

/// `getImage`: serve bytes and hash from the local cache.
fn get_image(hub: &Arc<Hub>, cmd: &Command) -> Result<ResponsePayload> {
    let Some(CommandPayload::GetImage(payload)) = &cmd.payload else {
        return Err(MuralError::Protocol("invalid get image payload".into()));
    };
    let (data, hash) = hub.cache().read(&payload.name)?;
    Ok(ResponsePayload::GetImage(GetImageResponse {
        name: payload.name.clone(),
        data,
        hash,
    }))
}
