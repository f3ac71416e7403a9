// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::SessionError;
use crate::channel::ChannelError;
use crate::credential::CredentialError;
use crate::fanout::FanoutError;
use crate::liveness::LivenessError;
use crate::store::StoreError;

/// Error codes for the control API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Unauthorized,
    SignatureRequired,
    InvalidSignature,
    StaleTimestamp,
    ReplayDetected,
    TokenExpired,
    RefreshReused,
    Forbidden,
    BadRequest,
    AgentNotFound,
    SessionNotFound,
    RateLimited,
    Unavailable,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized
            | Self::SignatureRequired
            | Self::InvalidSignature
            | Self::StaleTimestamp
            | Self::ReplayDetected
            | Self::TokenExpired
            | Self::RefreshReused => 401,
            Self::Forbidden => 403,
            Self::BadRequest => 400,
            Self::AgentNotFound | Self::SessionNotFound => 404,
            Self::RateLimited => 429,
            Self::Unavailable => 503,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::SignatureRequired => "SIGNATURE_REQUIRED",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::StaleTimestamp => "STALE_TIMESTAMP",
            Self::ReplayDetected => "REPLAY_DETECTED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::RefreshReused => "REFRESH_REUSED",
            Self::Forbidden => "FORBIDDEN",
            Self::BadRequest => "BAD_REQUEST",
            Self::AgentNotFound => "AGENT_NOT_FOUND",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::RateLimited => "RATE_LIMITED",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Error returned by HTTP handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlError {
    pub code: ErrorCode,
    pub message: String,
}

impl ControlError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    /// Internal failures are logged in full and reported generically.
    fn internal(detail: impl fmt::Display) -> Self {
        tracing::error!(err = %detail, "internal error");
        Self::new(ErrorCode::Internal, "internal error")
    }
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ControlError {}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        self.code.to_http_response(self.message).into_response()
    }
}

impl From<StoreError> for ControlError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) => {
                tracing::warn!(err = %err, "store unavailable");
                Self::new(ErrorCode::Unavailable, "store unavailable")
            }
            other => Self::internal(other),
        }
    }
}

impl From<CredentialError> for ControlError {
    fn from(err: CredentialError) -> Self {
        let code = match err {
            CredentialError::MissingCredential | CredentialError::InvalidCredential => {
                ErrorCode::Unauthorized
            }
            CredentialError::MissingSignature => ErrorCode::SignatureRequired,
            CredentialError::InvalidSignature => ErrorCode::InvalidSignature,
            CredentialError::StaleTimestamp => ErrorCode::StaleTimestamp,
            CredentialError::ReplayDetected => ErrorCode::ReplayDetected,
            CredentialError::NonceCapacity => ErrorCode::RateLimited,
            CredentialError::UnsafeValue(_) => ErrorCode::BadRequest,
            CredentialError::Uninitialised => ErrorCode::Unavailable,
            CredentialError::Store(inner) => return inner.into(),
        };
        Self::new(code, err.to_string())
    }
}

impl From<SessionError> for ControlError {
    fn from(err: SessionError) -> Self {
        let code = match err {
            SessionError::InvalidAccessToken
            | SessionError::InvalidRefresh
            | SessionError::ExpiredRefresh
            | SessionError::RevokedRefresh => ErrorCode::Unauthorized,
            SessionError::ExpiredAccessToken => ErrorCode::TokenExpired,
            SessionError::RefreshReused => ErrorCode::RefreshReused,
            SessionError::AnomalousRefreshRate { .. } => ErrorCode::RateLimited,
            SessionError::Signing(e) => return Self::internal(e),
            SessionError::Store(e) => return e.into(),
        };
        Self::new(code, err.to_string())
    }
}

impl From<LivenessError> for ControlError {
    fn from(err: LivenessError) -> Self {
        match err {
            LivenessError::UnknownAgent(_) => Self::new(ErrorCode::AgentNotFound, err.to_string()),
            LivenessError::InvalidAgentId(_) => Self::bad_request(err.to_string()),
            LivenessError::Auth(e) => e.into(),
            LivenessError::Store(e) => e.into(),
        }
    }
}

impl From<FanoutError> for ControlError {
    fn from(err: FanoutError) -> Self {
        match err {
            FanoutError::UnknownSession(_) => {
                Self::new(ErrorCode::SessionNotFound, err.to_string())
            }
            FanoutError::Forbidden => Self::forbidden(err.to_string()),
            FanoutError::InvalidDeadline(_) | FanoutError::InvalidTarget(_) => {
                Self::bad_request(err.to_string())
            }
            FanoutError::Dispatch(_) => Self::internal(err),
            FanoutError::Channel(e) => e.into(),
            FanoutError::Liveness(e) => e.into(),
        }
    }
}

impl From<ChannelError> for ControlError {
    fn from(err: ChannelError) -> Self {
        tracing::warn!(err = %err, "realtime channel failure");
        Self::new(ErrorCode::Unavailable, err.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
