// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator-facing HTTP handlers. The auth layer has already attached an
//! [`Operator`] to every request that reaches these.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::Deserialize;

use crate::auth::Operator;
use crate::credential::authority::{CredentialInspection, RotatedCredential};
use crate::error::ControlError;
use crate::fanout::{SessionResults, SessionStart, StartRequest};
use crate::state::ControlState;
use crate::store::AgentRecord;
use crate::transport::auth::require_admin;
use crate::transport::parse_body;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartSessionRequest {
    /// Explicit targets. Omitted means every online agent.
    #[serde(default)]
    pub agents: Option<Vec<String>>,
    pub target: String,
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResultsQuery {
    /// Block until the session completes.
    #[serde(default)]
    pub wait: bool,
}

/// `GET /api/v1/agents`
pub async fn list_agents(
    State(s): State<Arc<ControlState>>,
) -> Result<Json<Vec<AgentRecord>>, ControlError> {
    Ok(Json(s.liveness.list()?))
}

/// `GET /api/v1/agents/{id}`
pub async fn get_agent(
    State(s): State<Arc<ControlState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<AgentRecord>, ControlError> {
    Ok(Json(s.liveness.get(&agent_id)?))
}

/// `POST /api/v1/sessions`: start a fan-out and return once commands are out.
pub async fn start_session(
    State(s): State<Arc<ControlState>>,
    Extension(operator): Extension<Operator>,
    body: Bytes,
) -> Result<Json<SessionStart>, ControlError> {
    let req: StartSessionRequest = parse_body(&body)?;
    let request = StartRequest {
        agents: req.agents,
        target: req.target,
        deadline: req.deadline_secs.map(Duration::from_secs),
    };
    let started = s.fanout.launch(&operator, request).await?;
    Ok(Json(started))
}

/// `GET /api/v1/sessions/{id}/results[?wait=true]`
pub async fn session_results(
    State(s): State<Arc<ControlState>>,
    Extension(operator): Extension<Operator>,
    Path(session_id): Path<String>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<SessionResults>, ControlError> {
    // Visibility is checked before blocking.
    let results = s.fanout.get_results(&session_id, &operator)?;
    if !query.wait || results.complete {
        return Ok(Json(results));
    }

    tokio::select! {
        _ = s.shutdown.cancelled() => {}
        res = s.fanout.wait(&session_id) => res?,
    }
    Ok(Json(s.fanout.get_results(&session_id, &operator)?))
}

/// `POST /api/v1/credential/rotate` (admin)
pub async fn rotate_credential(
    State(s): State<Arc<ControlState>>,
    Extension(operator): Extension<Operator>,
) -> Result<Json<RotatedCredential>, ControlError> {
    require_admin(&operator)?;
    let rotated = s.authority.rotate()?;
    tracing::info!(by = %operator.subject, grace_until_ms = rotated.grace_until_ms, "agent credential rotated");
    Ok(Json(rotated))
}

/// `GET /api/v1/credential` (admin)
pub async fn inspect_credential(
    State(s): State<Arc<ControlState>>,
    Extension(operator): Extension<Operator>,
) -> Result<Json<CredentialInspection>, ControlError> {
    require_admin(&operator)?;
    Ok(Json(s.authority.inspect()?))
}
