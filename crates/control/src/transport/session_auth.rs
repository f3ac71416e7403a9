// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator login, refresh and logout.
//!
//! The refresh value only ever travels in an http-only cookie scoped to
//! `/api/v1/auth`; the access token is returned in the body.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::{Role, TokenPair, REFRESH_COOKIE, REFRESH_COOKIE_PATH};
use crate::error::ControlError;
use crate::state::ControlState;
use crate::transport::auth::{is_admin_token, ADMIN_SUBJECT};
use crate::transport::parse_body;

const MAX_SUBJECT_LEN: usize = 64;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    /// The static admin token.
    pub token: String,
    /// Operator name the session is issued to. Defaults to `admin`.
    #[serde(default)]
    pub subject: Option<String>,
    /// Role of the issued session. Defaults to `admin`.
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_at_ms: u64,
    pub subject: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub revoked: bool,
}

fn refresh_cookie(value: &str, max_age_secs: u64) -> String {
    format!(
        "{REFRESH_COOKIE}={value}; HttpOnly; Secure; SameSite=Strict; Path={REFRESH_COOKIE_PATH}; Max-Age={max_age_secs}"
    )
}

fn cleared_cookie() -> String {
    refresh_cookie("", 0)
}

/// Read the refresh value from the request cookies.
pub fn refresh_from_cookies(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().strip_prefix(REFRESH_COOKIE)?.strip_prefix('='))
        .find(|value| !value.is_empty())
        .map(str::to_owned)
}

fn token_response(state: &ControlState, pair: TokenPair) -> impl IntoResponse {
    let cookie = refresh_cookie(&pair.refresh.value, state.sessions.refresh_ttl().as_secs());
    let body = TokenResponse {
        access_token: pair.access.token,
        expires_at_ms: pair.access.expires_at_ms,
        subject: pair.operator.subject,
        role: pair.operator.role,
    };
    ([(SET_COOKIE, cookie)], Json(body))
}

/// `POST /api/v1/auth/login`: exchange the admin token for a session.
pub async fn login(
    State(s): State<Arc<ControlState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ControlError> {
    let req: LoginRequest = parse_body(&body)?;
    if !is_admin_token(&s, &req.token) {
        tracing::warn!("login with invalid admin token");
        return Err(ControlError::unauthorized("invalid admin token"));
    }
    let subject = req.subject.unwrap_or_else(|| ADMIN_SUBJECT.to_owned());
    let subject = subject.trim();
    if subject.is_empty() || subject.len() > MAX_SUBJECT_LEN {
        return Err(ControlError::bad_request("invalid subject"));
    }
    let role = req.role.unwrap_or(Role::Admin);

    let pair = s.sessions.login(subject, role)?;
    tracing::info!(subject, %role, "operator logged in");
    Ok(token_response(&s, pair))
}

/// `POST /api/v1/auth/refresh`: rotate the cookie's refresh value.
pub async fn refresh(
    State(s): State<Arc<ControlState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ControlError> {
    let value = refresh_from_cookies(&headers)
        .ok_or_else(|| ControlError::unauthorized("missing refresh cookie"))?;
    let pair = s.sessions.rotate(&value)?;
    Ok(token_response(&s, pair))
}

/// `POST /api/v1/auth/logout`: revoke the cookie's refresh value. Idempotent.
pub async fn logout(
    State(s): State<Arc<ControlState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ControlError> {
    let revoked = match refresh_from_cookies(&headers) {
        Some(value) => s.sessions.revoke(&value)?,
        None => false,
    };
    Ok(([(SET_COOKIE, cleared_cookie())], Json(LogoutResponse { revoked })))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn cookie_attributes() {
        let cookie = refresh_cookie("abc", 604_800);
        assert!(cookie.starts_with("meshctl_refresh=abc;"));
        for attr in ["HttpOnly", "Secure", "SameSite=Strict", "Path=/api/v1/auth", "Max-Age=604800"] {
            assert!(cookie.contains(attr), "missing {attr} in {cookie}");
        }
    }

    #[yare::parameterized(
        single   = { "meshctl_refresh=abc", Some("abc") },
        among    = { "theme=dark; meshctl_refresh=xyz; lang=en", Some("xyz") },
        cleared  = { "meshctl_refresh=", None },
        prefixed = { "meshctl_refresh_old=nope", None },
        absent   = { "theme=dark", None },
    )]
    fn reads_refresh_cookie(raw: &str, expected: Option<&str>) {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(raw).unwrap_or(HeaderValue::from_static("")));
        assert_eq!(refresh_from_cookies(&headers).as_deref(), expected);
    }
}
