// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator session manager.
//!
//! Access tokens are stateless HS256 JWTs. Refresh values are opaque random
//! strings; only their SHA-256 is stored, and each value is good for exactly
//! one rotation.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::auth::anomaly::RotationMonitor;
use crate::auth::{Claims, Operator, Role, SessionError};
use crate::clock::{ms, SharedClock};
use crate::store::{RefreshRecord, RefreshStore};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Rotations per subject per hour before the monitor complains.
    pub rotation_threshold: usize,
    /// Reject rotations above the threshold instead of only logging them.
    pub enforce_rate: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_ttl: Duration::from_secs(15 * 60),
            refresh_ttl: Duration::from_secs(7 * 24 * 3600),
            rotation_threshold: 100,
            enforce_rate: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessToken {
    pub token: String,
    pub expires_at_ms: u64,
}

/// Plaintext refresh value; handed to the caller once and never stored.
#[derive(Debug, Clone)]
pub struct IssuedRefresh {
    pub value: String,
    pub expires_at_ms: u64,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub operator: Operator,
    pub access: AccessToken,
    pub refresh: IssuedRefresh,
}

pub struct SessionManager {
    store: Arc<dyn RefreshStore>,
    clock: SharedClock,
    config: SessionConfig,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    monitor: RotationMonitor,
}

impl SessionManager {
    pub fn new(
        secret: &[u8],
        store: Arc<dyn RefreshStore>,
        clock: SharedClock,
        config: SessionConfig,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock.
        validation.validate_exp = false;
        validation.leeway = 0;
        Self {
            store,
            clock,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            monitor: RotationMonitor::hourly(config.rotation_threshold),
            config,
        }
    }

    pub fn issue_access_token(&self, subject: &str, role: Role) -> Result<AccessToken, SessionError> {
        let now = self.clock.now_ms();
        let expires_at_ms = now.saturating_add(ms(self.config.access_ttl));
        let claims = Claims {
            sub: subject.to_owned(),
            role,
            iat: now / 1000,
            exp: expires_at_ms / 1000,
            jti: uuid::Uuid::new_v4().to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(AccessToken { token, expires_at_ms })
    }

    pub fn verify_access_token(&self, token: &str) -> Result<Operator, SessionError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|_| SessionError::InvalidAccessToken)?;
        if self.clock.now_ms() / 1000 >= data.claims.exp {
            return Err(SessionError::ExpiredAccessToken);
        }
        if data.claims.sub.trim().is_empty() {
            return Err(SessionError::InvalidAccessToken);
        }
        Ok(Operator::new(data.claims.sub, data.claims.role))
    }

    /// Create a refresh credential. Only its hash is persisted.
    pub fn issue_refresh(&self, subject: &str, role: Role) -> Result<IssuedRefresh, SessionError> {
        let (issued, record) = self.new_refresh(subject, role);
        self.store.insert_refresh(record)?;
        Ok(issued)
    }

    /// Access token plus refresh credential for a freshly authenticated operator.
    pub fn login(&self, subject: &str, role: Role) -> Result<TokenPair, SessionError> {
        let access = self.issue_access_token(subject, role)?;
        let refresh = self.issue_refresh(subject, role)?;
        info!(subject, %role, "operator session started");
        Ok(TokenPair { operator: Operator::new(subject, role), access, refresh })
    }

    /// Look up a refresh value; fails if unknown, revoked or expired.
    pub fn verify(&self, refresh: &str) -> Result<RefreshRecord, SessionError> {
        let record = self.store.find_refresh(&hash_refresh(refresh))?;
        self.check_live(record)
    }

    /// Supersede `refresh` with a new value and a new access token.
    ///
    /// Presenting a value that was already rotated revokes every refresh
    /// credential of its owner.
    pub fn rotate(&self, refresh: &str) -> Result<TokenPair, SessionError> {
        let now = self.clock.now_ms();
        let old_hash = hash_refresh(refresh);
        let found = self.store.find_refresh(&old_hash)?;
        let record = match self.check_live(found.clone()) {
            Ok(record) => record,
            Err(SessionError::RevokedRefresh) => {
                let owner = found.map(|r| r.owner_id).unwrap_or_default();
                return Err(self.reuse_detected(&owner));
            }
            Err(e) => return Err(e),
        };

        let rate = self.monitor.record(&record.owner_id, now);
        if rate.exceeded {
            warn!(
                subject = %record.owner_id,
                count = rate.count,
                threshold = self.config.rotation_threshold,
                enforced = self.config.enforce_rate,
                "anomalous refresh rotation rate"
            );
            if self.config.enforce_rate {
                return Err(SessionError::AnomalousRefreshRate {
                    subject: record.owner_id,
                    count: rate.count,
                });
            }
        }

        let (issued, next) = self.new_refresh(&record.owner_id, record.role);
        if !self.store.swap_refresh(&old_hash, next)? {
            // A concurrent rotation consumed the value first.
            return Err(self.reuse_detected(&record.owner_id));
        }
        let access = self.issue_access_token(&record.owner_id, record.role)?;
        debug!(subject = %record.owner_id, "refresh credential rotated");
        Ok(TokenPair {
            operator: Operator::new(record.owner_id, record.role),
            access,
            refresh: issued,
        })
    }

    /// Mark a refresh value revoked. Unknown or already revoked values are fine.
    pub fn revoke(&self, refresh: &str) -> Result<bool, SessionError> {
        Ok(self.store.revoke_refresh(&hash_refresh(refresh))?)
    }

    /// Remove expired refresh rows and idle monitor entries.
    pub fn purge_expired(&self) -> Result<usize, SessionError> {
        let now = self.clock.now_ms();
        self.monitor.purge(now);
        Ok(self.store.purge_expired_refresh(now)?)
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.config.refresh_ttl
    }

    fn check_live(&self, record: Option<RefreshRecord>) -> Result<RefreshRecord, SessionError> {
        let record = record.ok_or(SessionError::InvalidRefresh)?;
        if record.revoked {
            return Err(SessionError::RevokedRefresh);
        }
        if self.clock.now_ms() >= record.expires_at_ms {
            return Err(SessionError::ExpiredRefresh);
        }
        Ok(record)
    }

    fn reuse_detected(&self, owner: &str) -> SessionError {
        match self.store.revoke_owner(owner) {
            Ok(revoked) => {
                warn!(subject = owner, revoked, "refresh credential reuse; revoked operator sessions")
            }
            Err(e) => warn!(subject = owner, err = %e, "refresh reuse; failed to revoke sessions"),
        }
        SessionError::RefreshReused
    }

    fn new_refresh(&self, subject: &str, role: Role) -> (IssuedRefresh, RefreshRecord) {
        let now = self.clock.now_ms();
        let mut bytes = [0u8; 32];
        rand::rng().fill(&mut bytes);
        let value = URL_SAFE_NO_PAD.encode(bytes);
        let expires_at_ms = now.saturating_add(ms(self.config.refresh_ttl));
        let record = RefreshRecord {
            owner_id: subject.to_owned(),
            role,
            hash: hash_refresh(&value),
            expires_at_ms,
            revoked: false,
            created_at_ms: now,
        };
        (IssuedRefresh { value, expires_at_ms }, record)
    }
}

/// Hex SHA-256 of a refresh value.
pub fn hash_refresh(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
