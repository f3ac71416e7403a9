// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/ws/events`: control-plane events streamed to operator dashboards.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use crate::error::ControlError;
use crate::events::ControlEvent;
use crate::state::ControlState;
use crate::transport::auth;

/// Query parameters for the events WebSocket.
#[derive(Debug, Clone, Deserialize)]
pub struct EventsQuery {
    pub token: Option<String>,
    /// Comma-separated event kinds (e.g. `agent_online,session_completed`),
    /// or `all`.
    #[serde(default = "default_types")]
    pub types: String,
}

fn default_types() -> String {
    "all".to_owned()
}

/// Which event kinds a connection wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    kinds: Option<Vec<String>>,
}

impl EventFilter {
    pub fn parse(types: &str) -> Self {
        if types.trim() == "all" {
            return Self { kinds: None };
        }
        let kinds =
            types.split(',').map(str::trim).filter(|k| !k.is_empty()).map(str::to_owned).collect();
        Self { kinds: Some(kinds) }
    }

    pub fn wants(&self, event: &ControlEvent) -> bool {
        match &self.kinds {
            None => true,
            Some(kinds) => kinds.iter().any(|k| k == event.kind()),
        }
    }
}

/// `GET /ws/events`: authenticated via `?token=`.
pub async fn events_handler(
    State(state): State<Arc<ControlState>>,
    Query(query): Query<EventsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let operator = match query.token.as_deref() {
        Some(token) => auth::resolve_operator(&state, token),
        None => Err(ControlError::unauthorized("missing token")),
    };
    let operator = match operator {
        Ok(operator) => operator,
        Err(e) => return e.into_response(),
    };

    tracing::debug!(subject = %operator.subject, "events client connected");
    let filter = EventFilter::parse(&query.types);
    ws.on_upgrade(move |socket| handle_events(state, filter, socket)).into_response()
}

/// Per-connection loop: forward matching events until either side goes away.
async fn handle_events(state: Arc<ControlState>, filter: EventFilter, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut events = state.events.subscribe();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            event = events.recv() => {
                let event = match event {
                    Ok(e) => e,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "events client lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if !filter.wants(&event) {
                    continue;
                }
                if let Ok(json) = serde_json::to_string(&event) {
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
}
