use axum::extract::rejection::QueryRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use ulid::Ulid;

use super::{ApiError, AppState};
use crate::gateway::{Admission, Envelope, Role};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
}

/// Inbound observer frame: `{"type": "join", "payload": {"room": "resource_1"}}`.
#[derive(Debug, Deserialize)]
struct ClientFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

/// Admission happens before the upgrade so refused claims get a plain HTTP
/// error instead of a socket that closes immediately.
pub async fn connect(
    State(state): State<AppState>,
    params: Result<Query<ConnectParams>, QueryRejection>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let Query(params) = params?;
    let admission = state.gateway.connect(
        params.role.unwrap_or(Role::Client),
        params.secret.as_deref(),
        params.client_id.as_deref(),
    )?;
    Ok(upgrade.on_upgrade(move |socket| run_session(socket, state, admission)))
}

async fn run_session(socket: WebSocket, state: AppState, admission: Admission) {
    let Admission {
        session_id,
        role,
        mut rx,
        ..
    } = admission;
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            outbound = rx.recv() => match outbound {
                Some(envelope) => {
                    if sink.send(Message::Text(envelope.to_json().into())).await.is_err() {
                        break;
                    }
                }
                // Displaced by a newer session with the same client id.
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&state, session_id, role, text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    state.gateway.disconnect(session_id);
}

async fn handle_frame(state: &AppState, session_id: Ulid, role: Role, raw: &str) {
    let reply = match serde_json::from_str::<ClientFrame>(raw) {
        Ok(frame) => apply_frame(state, session_id, role, frame).await,
        Err(e) => Err(format!("malformed frame: {e}")),
    };
    if let Err(message) = reply {
        debug!("session {session_id}: {message}");
        let _ = state.gateway.send_to(session_id, Envelope::error(message));
    }
}

async fn apply_frame(
    state: &AppState,
    session_id: Ulid,
    role: Role,
    frame: ClientFrame,
) -> Result<(), String> {
    let field = |name: &str| {
        frame
            .payload
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| format!("{} requires payload.{name}", frame.kind))
    };
    match frame.kind.as_str() {
        "join" => state
            .gateway
            .join(session_id, &field("room")?)
            .map_err(|e| e.to_string()),
        "leave" => state
            .gateway
            .leave(session_id, &field("room")?)
            .map_err(|e| e.to_string()),
        "ring" if role == Role::Admin => state
            .relay
            .ring_resource(&field("resourceId")?)
            .await
            .map_err(|e| e.to_string()),
        "ring" => Err("ring requires the admin role".into()),
        other => Err(format!("unknown frame type: {other}")),
    }
}
