// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared agent credential: generation, rotation with grace, validation and
//! optional HMAC request signing.
//!
//! The credential is a single secret every agent presents in `x-agent-key`.
//! Rotation keeps the previous value valid for a bounded grace window so the
//! fleet can be re-keyed without a flag day.

pub mod authority;
pub mod cache;
pub mod signature;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

pub use authority::{AuthorityConfig, CredentialAuthority};

/// Structured prefix of every generated credential.
pub const KEY_PREFIX: &str = "mk_live_";

/// Random bytes in the credential suffix (256 bits).
const KEY_ENTROPY_BYTES: usize = 32;

/// Minimum accepted length for any credential, generated or supplied.
pub const MIN_KEY_LEN: usize = 40;

/// Values that must never be accepted as the agent credential.
pub const UNSAFE_VALUES: &[&str] = &[
    "changeme",
    "change-me",
    "change_me",
    "default",
    "password",
    "secret",
    "api_key",
    "api-key",
    "apikey",
    "your-api-key",
    "your_api_key",
    "your-api-key-here",
    "replace-me",
    "placeholder",
    "test",
    "testing",
    "example",
    "admin",
    "letmein",
    "12345678",
    "xxxxxxxx",
];

/// Whether a missing request signature is tolerated.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SigningMode {
    /// Unsigned requests are accepted and logged.
    #[default]
    Soft,
    /// Unsigned requests are rejected.
    Enforced,
}

impl std::fmt::Display for SigningMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Soft => f.write_str("soft"),
            Self::Enforced => f.write_str("enforced"),
        }
    }
}

/// Signature headers as sent by an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeaders {
    /// Unix seconds, decimal.
    pub timestamp: String,
    /// Lowercase hex HMAC-SHA256 of `"{timestamp}.{body}"`.
    pub signature: String,
    pub nonce: String,
}

/// Everything an agent request presents for authentication.
#[derive(Debug, Clone, Copy)]
pub struct AgentAuth<'a> {
    pub credential: Option<&'a str>,
    pub signature: Option<&'a SignatureHeaders>,
    pub body: &'a [u8],
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("missing agent credential")]
    MissingCredential,
    #[error("invalid agent credential")]
    InvalidCredential,
    #[error("missing request signature")]
    MissingSignature,
    #[error("invalid request signature")]
    InvalidSignature,
    #[error("request timestamp outside the accepted window")]
    StaleTimestamp,
    #[error("replayed request nonce")]
    ReplayDetected,
    #[error("too many signed requests in flight")]
    NonceCapacity,
    #[error("unsafe credential value: {0}")]
    UnsafeValue(String),
    #[error("agent credential has not been initialised")]
    Uninitialised,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Generate a fresh credential: structured prefix + 256-bit random suffix.
pub fn generate_key() -> String {
    let mut bytes = [0u8; KEY_ENTROPY_BYTES];
    rand::rng().fill(&mut bytes);
    format!("{KEY_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// True if `value` is (or trivially derives from) a known placeholder.
pub fn is_unsafe_value(value: &str) -> bool {
    let lowered = value.trim().to_lowercase();
    let stripped = lowered.strip_prefix(KEY_PREFIX).unwrap_or(&lowered);
    if UNSAFE_VALUES.iter().any(|bad| lowered == *bad || stripped == *bad) {
        return true;
    }
    // Single repeated character, e.g. "aaaaaaaa...".
    let mut chars = stripped.chars();
    match chars.next() {
        Some(first) => chars.all(|c| c == first),
        None => true,
    }
}

/// Validate a caller-supplied credential before it is installed.
pub fn check_supplied(value: &str) -> Result<(), CredentialError> {
    if is_unsafe_value(value) {
        return Err(CredentialError::UnsafeValue("matches a known placeholder".into()));
    }
    if value.len() < MIN_KEY_LEN {
        return Err(CredentialError::UnsafeValue(format!(
            "shorter than {MIN_KEY_LEN} characters"
        )));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CredentialError::UnsafeValue("contains whitespace".into()));
    }
    Ok(())
}

/// Short, non-secret preview of a credential for logs and inspection.
pub fn mask(value: &str) -> String {
    let visible: String = value.chars().take(KEY_PREFIX.len() + 4).collect();
    format!("{visible}…")
}

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

#[cfg(test)]
#[path = "key_tests.rs"]
mod tests;
