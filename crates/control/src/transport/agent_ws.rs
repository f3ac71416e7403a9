// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/ws/agents/{id}`: command link for agents that cannot reach the broker.
//!
//! Commands published on the agent's subject are forwarded as text frames.
//! Inbound text frames are [`DiagnosticReply`]s, republished on the session's
//! result subject where the coordinator's ingest loop picks them up.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};

use crate::channel::{is_subject_token, MessageStream};
use crate::credential::AgentAuth;
use crate::error::ControlError;
use crate::fanout::DiagnosticReply;
use crate::state::ControlState;
use crate::transport::agent::{signature_headers, AGENT_KEY_HEADER};

/// `GET /ws/agents/{id}`: authenticated with the agent headers on the upgrade.
pub async fn agent_handler(
    State(state): State<Arc<ControlState>>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    match accept(&state, &agent_id, &headers).await {
        Ok(commands) => {
            tracing::info!(agent_id = %agent_id, "agent command link connected");
            ws.on_upgrade(move |socket| handle_agent(state, agent_id, commands, socket))
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Authenticate the upgrade and subscribe before the socket is handed over,
/// so commands published right after the handshake are not lost.
async fn accept(
    state: &ControlState,
    agent_id: &str,
    headers: &HeaderMap,
) -> Result<MessageStream, ControlError> {
    let signature = signature_headers(headers)?;
    let auth = AgentAuth {
        credential: headers.get(AGENT_KEY_HEADER).and_then(|v| v.to_str().ok()),
        signature: signature.as_ref(),
        body: b"",
    };
    state.authority.authenticate(auth)?;
    state.liveness.get(agent_id)?;
    Ok(state.channel.subscribe(state.subjects.agent_command(agent_id)).await?)
}

async fn handle_agent(
    state: Arc<ControlState>,
    agent_id: String,
    mut commands: MessageStream,
    socket: WebSocket,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            command = commands.next() => {
                let Some(command) = command else { break };
                let Ok(text) = String::from_utf8(command.payload.to_vec()) else {
                    tracing::warn!(agent_id = %agent_id, "non-utf8 command dropped");
                    continue;
                };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        forward_reply(&state, &agent_id, text.as_str().as_bytes()).await;
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
    tracing::info!(agent_id = %agent_id, "agent command link closed");
}

/// Republish one reply frame on its session's result subject.
async fn forward_reply(state: &ControlState, agent_id: &str, frame: &[u8]) {
    let reply: DiagnosticReply = match serde_json::from_slice(frame) {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(agent_id, err = %e, "malformed reply frame");
            return;
        }
    };
    if reply.agent_id != agent_id {
        tracing::warn!(agent_id, claimed = %reply.agent_id, "reply for another agent dropped");
        return;
    }
    if !is_subject_token(&reply.session_id) {
        tracing::warn!(agent_id, session_id = %reply.session_id, "reply with unroutable session");
        return;
    }
    let subject = state.subjects.session_results(&reply.session_id);
    match serde_json::to_vec(&reply) {
        Ok(payload) => {
            if let Err(e) = state.channel.publish(subject, Bytes::from(payload)).await {
                tracing::debug!(agent_id, err = %e, "reply not delivered");
            }
        }
        Err(e) => tracing::warn!(agent_id, err = %e, "reply not encodable"),
    }
}
