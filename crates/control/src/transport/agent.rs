// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-facing HTTP handlers.
//!
//! Bodies are taken as raw bytes so the request signature can be checked
//! over exactly what was sent, then decoded into strict boundary types.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::credential::{AgentAuth, CredentialError, SignatureHeaders};
use crate::error::ControlError;
use crate::fanout::{DiagnosticReply, IngestOutcome};
use crate::liveness::{AgentMetadata, DiagnosticReport, HeartbeatAck, HeartbeatMetrics, NetworkInfo};
use crate::state::ControlState;
use crate::store::AgentRecord;
use crate::transport::parse_body;

pub const AGENT_KEY_HEADER: &str = "x-agent-key";
pub const SIGNATURE_TIMESTAMP_HEADER: &str = "x-signature-timestamp";
pub const SIGNATURE_HEADER: &str = "x-signature";
pub const SIGNATURE_NONCE_HEADER: &str = "x-signature-nonce";

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub network: Option<NetworkInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub metrics: HeartbeatMetrics,
}

#[derive(Debug, Serialize)]
pub struct DiagnosticAck {
    pub agent_id: String,
    pub received_at_ms: u64,
    /// Whether the report resolved an entry of a running fan-out session.
    pub ingested: bool,
}

// -- Helpers ------------------------------------------------------------------

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Collect the signature headers. All three or none must be present.
pub fn signature_headers(headers: &HeaderMap) -> Result<Option<SignatureHeaders>, ControlError> {
    match (
        header(headers, SIGNATURE_TIMESTAMP_HEADER),
        header(headers, SIGNATURE_HEADER),
        header(headers, SIGNATURE_NONCE_HEADER),
    ) {
        (None, None, None) => Ok(None),
        (Some(timestamp), Some(signature), Some(nonce)) => Ok(Some(SignatureHeaders {
            timestamp: timestamp.to_owned(),
            signature: signature.to_owned(),
            nonce: nonce.to_owned(),
        })),
        _ => Err(CredentialError::InvalidSignature.into()),
    }
}

// -- Handlers -----------------------------------------------------------------

/// `POST /api/v1/agents/register`
pub async fn register(
    State(s): State<Arc<ControlState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AgentRecord>, ControlError> {
    let req: RegisterRequest = parse_body(&body)?;
    let signature = signature_headers(&headers)?;
    let auth = AgentAuth {
        credential: header(&headers, AGENT_KEY_HEADER),
        signature: signature.as_ref(),
        body: &body,
    };
    let metadata =
        AgentMetadata { hostname: req.hostname, version: req.version, network: req.network };
    let record = s.liveness.register(req.agent_id.as_deref(), auth, metadata)?;
    Ok(Json(record))
}

/// `POST /api/v1/agents/{id}/heartbeat`
pub async fn heartbeat(
    State(s): State<Arc<ControlState>>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<HeartbeatAck>, ControlError> {
    let req: HeartbeatRequest = parse_body(&body)?;
    let signature = signature_headers(&headers)?;
    let auth = AgentAuth {
        credential: header(&headers, AGENT_KEY_HEADER),
        signature: signature.as_ref(),
        body: &body,
    };
    Ok(Json(s.liveness.heartbeat(&agent_id, auth, req.metrics)?))
}

/// `POST /api/v1/agents/{id}/diagnostics`
///
/// A report that names a session also resolves the agent's entry there.
pub async fn diagnostics(
    State(s): State<Arc<ControlState>>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DiagnosticAck>, ControlError> {
    let report: DiagnosticReport = parse_body(&body)?;
    let signature = signature_headers(&headers)?;
    let auth = AgentAuth {
        credential: header(&headers, AGENT_KEY_HEADER),
        signature: signature.as_ref(),
        body: &body,
    };
    let record = s.liveness.report_diagnostic(&agent_id, auth, report)?;

    let ingested = match record.session_id.clone() {
        Some(session_id) => {
            let reply = DiagnosticReply {
                session_id,
                agent_id: agent_id.clone(),
                success: record.success,
                latency_ms: record.latency_ms,
                error: record.error.clone(),
            };
            match s.fanout.ingest(reply) {
                Ok(IngestOutcome::Resolved(_)) => true,
                Ok(IngestOutcome::Ignored) => false,
                Err(e) => {
                    tracing::debug!(agent_id = %agent_id, err = %e, "diagnostic not ingested");
                    false
                }
            }
        }
        None => false,
    };

    Ok(Json(DiagnosticAck { agent_id, received_at_ms: record.received_at_ms, ingested }))
}
