// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator authentication: short-lived access tokens and rotating
//! single-use refresh credentials.

pub mod anomaly;
pub mod session;

use serde::{Deserialize, Serialize};

use crate::store::StoreError;

pub use anomaly::RotationMonitor;
pub use session::{AccessToken, IssuedRefresh, SessionConfig, SessionManager, TokenPair};

/// Name of the http-only cookie carrying the refresh value.
pub const REFRESH_COOKIE: &str = "meshctl_refresh";

/// Path the refresh cookie is scoped to.
pub const REFRESH_COOKIE_PATH: &str = "/api/v1/auth";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Viewer => "viewer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated operator, attached to requests by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operator {
    pub subject: String,
    pub role: Role,
}

impl Operator {
    pub fn new(subject: impl Into<String>, role: Role) -> Self {
        Self { subject: subject.into(), role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Access token claims. `exp`/`iat` are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: u64,
    pub exp: u64,
    pub jti: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid access token")]
    InvalidAccessToken,
    #[error("access token expired")]
    ExpiredAccessToken,
    #[error("invalid refresh credential")]
    InvalidRefresh,
    #[error("refresh credential expired")]
    ExpiredRefresh,
    #[error("refresh credential revoked")]
    RevokedRefresh,
    #[error("refresh credential reused; all sessions for this operator were revoked")]
    RefreshReused,
    #[error("refresh rotation rate exceeded for {subject}: {count} in the last hour")]
    AnomalousRefreshRate { subject: String, count: usize },
    #[error("token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}
