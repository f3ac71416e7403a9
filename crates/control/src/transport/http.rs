// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::credential::SigningMode;
use crate::state::ControlState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub signing_mode: SigningMode,
    pub active_sessions: usize,
}

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<ControlState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running".to_owned(),
        signing_mode: s.authority.signing_mode(),
        active_sessions: s.fanout.session_count(),
    })
}
