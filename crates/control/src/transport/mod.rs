// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the control plane.

pub mod agent;
pub mod agent_ws;
pub mod auth;
pub mod http;
pub mod operator;
pub mod session_auth;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use serde::de::DeserializeOwned;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ControlError;
use crate::state::ControlState;

/// Decode a JSON request body into a strict boundary type.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ControlError> {
    serde_json::from_slice(body).map_err(|e| ControlError::bad_request(format!("invalid body: {e}")))
}

/// Build the axum `Router` with all control-plane routes.
pub fn build_router(state: Arc<ControlState>) -> Router {
    let operator = Router::new()
        .route("/api/v1/agents", get(operator::list_agents))
        .route("/api/v1/agents/{id}", get(operator::get_agent))
        .route("/api/v1/sessions", post(operator::start_session))
        .route("/api/v1/sessions/{id}/results", get(operator::session_results))
        .route("/api/v1/credential", get(operator::inspect_credential))
        .route("/api/v1/credential/rotate", post(operator::rotate_credential))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::operator_layer));

    Router::new()
        // Health (no auth)
        .route("/api/v1/health", get(http::health))
        // Agents authenticate with the shared credential per request
        .route("/api/v1/agents/register", post(agent::register))
        .route("/api/v1/agents/{id}/heartbeat", post(agent::heartbeat))
        .route("/api/v1/agents/{id}/diagnostics", post(agent::diagnostics))
        // Operator sessions
        .route("/api/v1/auth/login", post(session_auth::login))
        .route("/api/v1/auth/refresh", post(session_auth::refresh))
        .route("/api/v1/auth/logout", post(session_auth::logout))
        // Event stream (token in query)
        .route("/ws/events", get(ws::events_handler))
        // Command link for agents (agent headers on the upgrade)
        .route("/ws/agents/{id}", get(agent_ws::agent_handler))
        .merge(operator)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
