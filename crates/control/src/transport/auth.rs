// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator authentication for HTTP and WebSocket routes.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::auth::{Operator, Role};
use crate::credential::constant_time_eq;
use crate::error::ControlError;
use crate::state::ControlState;

/// Subject attached to requests made with the static admin token.
pub const ADMIN_SUBJECT: &str = "admin";

/// Extract the token from an `Authorization: Bearer ...` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get("authorization").and_then(|v| v.to_str().ok())?.strip_prefix("Bearer ")
}

/// True if `token` is the configured static admin token.
pub fn is_admin_token(state: &ControlState, token: &str) -> bool {
    state.config.admin_token.as_deref().is_some_and(|expected| constant_time_eq(token, expected))
}

/// Resolve a bearer value (admin token or access token) to an operator.
pub fn resolve_operator(state: &ControlState, token: &str) -> Result<Operator, ControlError> {
    if is_admin_token(state, token) {
        return Ok(Operator::new(ADMIN_SUBJECT, Role::Admin));
    }
    Ok(state.sessions.verify_access_token(token)?)
}

/// Axum middleware that requires an operator bearer token and attaches the
/// resolved [`Operator`] as a request extension.
pub async fn operator_layer(
    State(state): State<Arc<ControlState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let operator = match bearer_token(req.headers()) {
        Some(token) => resolve_operator(&state, token),
        None => Err(ControlError::unauthorized("missing bearer token")),
    };
    match operator {
        Ok(operator) => {
            req.extensions_mut().insert(operator);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

/// Reject non-admin operators.
pub fn require_admin(operator: &Operator) -> Result<(), ControlError> {
    if operator.is_admin() {
        Ok(())
    } else {
        Err(ControlError::forbidden("admin role required"))
    }
}
