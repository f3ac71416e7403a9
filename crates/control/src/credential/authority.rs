// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential authority: owns the agent credential lifecycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::{ms, SharedClock};
use crate::credential::cache::CredentialCache;
use crate::credential::signature::{
    self, NonceCache, NonceCheck, DEFAULT_NONCE_CAPACITY, MAX_NONCE_LEN,
};
use crate::credential::{
    check_supplied, constant_time_eq, generate_key, is_unsafe_value, mask, AgentAuth,
    CredentialError, SignatureHeaders, SigningMode, KEY_PREFIX, MIN_KEY_LEN,
};
use crate::events::{ControlEvent, EventHub};
use crate::store::{AgentCredential, CredentialStore};

/// Credentials older than this are flagged for rotation.
const MAX_RECOMMENDED_AGE: Duration = Duration::from_secs(90 * 24 * 3600);

#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    /// How long a rotated-out credential stays valid.
    pub grace: Duration,
    /// Minimum spacing between usage-stat writes.
    pub usage_write_interval: Duration,
    pub cache_ttl: Duration,
    pub signing_mode: SigningMode,
    /// Accepted clock skew for signed requests; also the nonce lifetime.
    pub signature_ttl: Duration,
    pub nonce_capacity: usize,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(24 * 3600),
            usage_write_interval: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(30),
            signing_mode: SigningMode::Soft,
            signature_ttl: Duration::from_secs(300),
            nonce_capacity: DEFAULT_NONCE_CAPACITY,
        }
    }
}

/// Result of [`CredentialAuthority::rotate`]. `new_value` is only ever returned here.
#[derive(Debug, Clone, Serialize)]
pub struct RotatedCredential {
    pub new_value: String,
    pub grace_until_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureVerdict {
    Verified,
    /// No signature supplied; only possible in soft mode.
    Unsigned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// A persisted credential was found and kept.
    Loaded,
    /// The operator-supplied value was installed.
    Installed,
    /// A new credential was generated. Shown once.
    Generated { value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SecurityReport {
    pub secure: bool,
    pub warnings: Vec<String>,
    pub remediation: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialInspection {
    pub key_preview: String,
    pub created_at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotated_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at_ms: Option<u64>,
    pub usage_count: u64,
    pub grace_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_until_ms: Option<u64>,
    pub signing_mode: SigningMode,
    pub security: SecurityReport,
}

/// Buffers usage increments so high-frequency heartbeats cost at most one
/// store write per interval.
#[derive(Default)]
struct UsageMeter {
    pending: AtomicU64,
    last_used_ms: AtomicU64,
    last_flush_ms: AtomicU64,
}

pub struct CredentialAuthority {
    store: Arc<dyn CredentialStore>,
    clock: SharedClock,
    config: AuthorityConfig,
    cache: CredentialCache,
    nonces: Mutex<NonceCache>,
    usage: UsageMeter,
    /// Serialises rotation, bootstrap and grace cleanup.
    write_lock: Mutex<()>,
    events: EventHub,
}

impl CredentialAuthority {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        clock: SharedClock,
        config: AuthorityConfig,
        events: EventHub,
    ) -> Self {
        Self {
            store,
            clock,
            cache: CredentialCache::new(ms(config.cache_ttl)),
            nonces: Mutex::new(NonceCache::new(config.nonce_capacity)),
            usage: UsageMeter::default(),
            write_lock: Mutex::new(()),
            config,
            events,
        }
    }

    pub fn signing_mode(&self) -> SigningMode {
        self.config.signing_mode
    }

    /// Produce a credential value: the supplied one if it passes the safety
    /// checks, otherwise a freshly generated key.
    pub fn generate(&self, supplied: Option<&str>) -> Result<String, CredentialError> {
        match supplied {
            Some(value) => {
                check_supplied(value)?;
                Ok(value.to_owned())
            }
            None => Ok(generate_key()),
        }
    }

    /// Ensure a credential exists. Runs once at startup.
    pub fn bootstrap(&self, supplied: Option<&str>) -> Result<BootstrapOutcome, CredentialError> {
        let _guard = self.write_lock.lock();
        let now = self.clock.now_ms();

        if let Some(existing) = self.store.load_credential()? {
            if let Some(value) = supplied {
                let known = existing.candidates(now).into_iter().any(|c| constant_time_eq(c, value));
                if !known {
                    warn!(
                        persisted = %mask(&existing.current_value),
                        "configured agent key differs from the persisted credential; keeping persisted (rotate to change it)"
                    );
                }
            }
            self.cache.put(existing, now);
            return Ok(BootstrapOutcome::Loaded);
        }

        let value = self.generate(supplied)?;
        let credential = AgentCredential::new(value.clone(), now);
        self.store.save_credential(&credential)?;
        self.cache.put(credential, now);
        if supplied.is_some() {
            info!(key = %mask(&value), "installed configured agent credential");
            Ok(BootstrapOutcome::Installed)
        } else {
            info!(key = %mask(&value), "generated agent credential");
            Ok(BootstrapOutcome::Generated { value })
        }
    }

    /// Move current → previous with a grace window and install a new value.
    ///
    /// Any value that was already in grace is dropped immediately.
    pub fn rotate(&self) -> Result<RotatedCredential, CredentialError> {
        let _guard = self.write_lock.lock();
        let now = self.clock.now_ms();
        let old = self.store.load_credential()?.ok_or(CredentialError::Uninitialised)?;
        if old.previous_in_grace(now).is_some() {
            warn!("rotating while a previous credential is still in grace; it is revoked now");
        }

        let grace_until_ms = now.saturating_add(ms(self.config.grace));
        let new_value = generate_key();
        let next = AgentCredential {
            current_value: new_value.clone(),
            previous_value: Some(old.current_value),
            previous_expiry_ms: Some(grace_until_ms),
            created_at_ms: now,
            rotated_at_ms: Some(now),
            last_used_at_ms: None,
            usage_count: 0,
        };
        self.store.save_credential(&next)?;
        self.cache.put(next, now);
        self.usage.pending.store(0, Ordering::Release);
        self.usage.last_used_ms.store(0, Ordering::Release);

        info!(key = %mask(&new_value), grace_until_ms, "agent credential rotated");
        self.events.emit(ControlEvent::CredentialRotated { grace_until_ms });
        Ok(RotatedCredential { new_value, grace_until_ms })
    }

    /// Accept the current value, or the previous value while its grace is open.
    pub fn validate(&self, provided: &str) -> Result<(), CredentialError> {
        let now = self.clock.now_ms();
        let credential = self.current(now)?;
        let mut matched = false;
        for candidate in credential.candidates(now) {
            matched |= constant_time_eq(candidate, provided);
        }
        if !matched {
            return Err(CredentialError::InvalidCredential);
        }
        self.note_usage(now);
        Ok(())
    }

    /// Check optional signature headers against every currently valid key.
    pub fn validate_signed_request(
        &self,
        headers: Option<&SignatureHeaders>,
        body: &[u8],
    ) -> Result<SignatureVerdict, CredentialError> {
        let Some(headers) = headers else {
            return match self.config.signing_mode {
                SigningMode::Soft => {
                    debug!("unsigned agent request accepted (soft signing mode)");
                    Ok(SignatureVerdict::Unsigned)
                }
                SigningMode::Enforced => Err(CredentialError::MissingSignature),
            };
        };

        let now = self.clock.now_ms();
        let ttl_ms = ms(self.config.signature_ttl);
        let Ok(ts_secs) = headers.timestamp.trim().parse::<u64>() else {
            warn!(timestamp = %headers.timestamp, "malformed signature timestamp");
            return Err(CredentialError::InvalidSignature);
        };
        let ts_ms = ts_secs.saturating_mul(1000);
        let skew_ms = now.abs_diff(ts_ms);
        if skew_ms > ttl_ms {
            warn!(skew_ms, ttl_ms, "signed request outside the timestamp window");
            return Err(CredentialError::StaleTimestamp);
        }
        if headers.nonce.is_empty() || headers.nonce.len() > MAX_NONCE_LEN {
            warn!(nonce_len = headers.nonce.len(), "signed request with unusable nonce");
            return Err(CredentialError::InvalidSignature);
        }

        let credential = self.current(now)?;
        let verified = credential
            .candidates(now)
            .into_iter()
            .any(|key| signature::verify(key, &headers.timestamp, body, &headers.signature));
        if !verified {
            warn!(mode = %self.config.signing_mode, "agent request signature did not verify");
            return Err(CredentialError::InvalidSignature);
        }

        // Only authenticated nonces are remembered. The nonce must outlive
        // every instant at which this timestamp is still inside the window.
        let expires_at_ms = now.max(ts_ms).saturating_add(ttl_ms);
        match self.nonces.lock().check_and_insert(&headers.nonce, now, expires_at_ms) {
            NonceCheck::Fresh => {}
            NonceCheck::Replayed => {
                warn!(
                    nonce = %headers.nonce,
                    timestamp = %headers.timestamp,
                    "replayed signed request rejected"
                );
                return Err(CredentialError::ReplayDetected);
            }
            NonceCheck::Full => {
                warn!(capacity = self.config.nonce_capacity, "nonce cache full; signed request refused");
                return Err(CredentialError::NonceCapacity);
            }
        }
        Ok(SignatureVerdict::Verified)
    }

    /// Full agent authentication: credential, then signature.
    pub fn authenticate(&self, auth: AgentAuth<'_>) -> Result<SignatureVerdict, CredentialError> {
        let provided = auth.credential.ok_or(CredentialError::MissingCredential)?;
        self.validate(provided)?;
        self.validate_signed_request(auth.signature, auth.body)
    }

    /// Report whether the active credential meets format and strength rules.
    pub fn security_check(&self) -> Result<SecurityReport, CredentialError> {
        let now = self.clock.now_ms();
        let credential = self.store.load_credential()?.ok_or(CredentialError::Uninitialised)?;
        Ok(self.assess(&credential, now))
    }

    /// Usage statistics, grace status and security findings.
    pub fn inspect(&self) -> Result<CredentialInspection, CredentialError> {
        let now = self.clock.now_ms();
        let credential = self.store.load_credential()?.ok_or(CredentialError::Uninitialised)?;
        let pending = self.usage.pending.load(Ordering::Acquire);
        let metered = self.usage.last_used_ms.load(Ordering::Acquire);
        let last_used_at_ms = match (credential.last_used_at_ms, metered) {
            (stored, 0) => stored,
            (Some(stored), m) => Some(stored.max(m)),
            (None, m) => Some(m),
        };
        let grace_active = credential.previous_in_grace(now).is_some();
        Ok(CredentialInspection {
            key_preview: mask(&credential.current_value),
            created_at_ms: credential.created_at_ms,
            rotated_at_ms: credential.rotated_at_ms,
            last_used_at_ms,
            usage_count: credential.usage_count.saturating_add(pending),
            grace_active,
            grace_until_ms: if grace_active { credential.previous_expiry_ms } else { None },
            signing_mode: self.config.signing_mode,
            security: self.assess(&credential, now),
        })
    }

    /// Drop an expired previous value from the stored row.
    pub fn collect_expired_previous(&self) -> Result<bool, CredentialError> {
        let _guard = self.write_lock.lock();
        let now = self.clock.now_ms();
        let Some(mut credential) = self.store.load_credential()? else {
            return Ok(false);
        };
        if credential.previous_value.is_none() || credential.previous_in_grace(now).is_some() {
            return Ok(false);
        }
        credential.previous_value = None;
        credential.previous_expiry_ms = None;
        self.store.save_credential(&credential)?;
        self.cache.put(credential, now);
        debug!("expired previous agent credential removed");
        Ok(true)
    }

    /// Eagerly reap expired nonces.
    pub fn purge_nonces(&self) -> usize {
        self.nonces.lock().purge(self.clock.now_ms())
    }

    /// Write any buffered usage now, ignoring the throttle.
    pub fn flush_usage(&self) {
        let now = self.clock.now_ms();
        self.usage.last_flush_ms.store(now, Ordering::Release);
        self.write_usage();
    }

    fn current(&self, now: u64) -> Result<AgentCredential, CredentialError> {
        self.cache.get(self.store.as_ref(), now)?.ok_or(CredentialError::Uninitialised)
    }

    fn note_usage(&self, now: u64) {
        self.usage.pending.fetch_add(1, Ordering::AcqRel);
        self.usage.last_used_ms.fetch_max(now, Ordering::AcqRel);

        let last = self.usage.last_flush_ms.load(Ordering::Acquire);
        if now.saturating_sub(last) < ms(self.config.usage_write_interval) {
            return;
        }
        if self
            .usage
            .last_flush_ms
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.write_usage();
        }
    }

    fn write_usage(&self) {
        let uses = self.usage.pending.swap(0, Ordering::AcqRel);
        if uses == 0 {
            return;
        }
        let last_used = self.usage.last_used_ms.load(Ordering::Acquire);
        if let Err(e) = self.store.record_usage(uses, last_used) {
            // Usage stats are best-effort; keep the count for the next flush.
            self.usage.pending.fetch_add(uses, Ordering::AcqRel);
            warn!(err = %e, uses, "failed to record credential usage");
        }
    }

    fn assess(&self, credential: &AgentCredential, now: u64) -> SecurityReport {
        let value = credential.current_value.as_str();
        let mut report = SecurityReport { secure: true, ..SecurityReport::default() };
        let mut fail = |warning: String, fix: &str| {
            report.secure = false;
            report.warnings.push(warning);
            report.remediation.push(fix.to_owned());
        };

        if is_unsafe_value(value) {
            fail("credential matches a known placeholder value".into(), "rotate the credential");
        }
        if value.len() < MIN_KEY_LEN {
            fail(
                format!("credential is shorter than {MIN_KEY_LEN} characters"),
                "rotate to a generated credential",
            );
        }
        if !value.starts_with(KEY_PREFIX) {
            fail(
                format!("credential lacks the `{KEY_PREFIX}` prefix"),
                "rotate to a generated credential",
            );
        }

        let age_ms = now.saturating_sub(credential.created_at_ms);
        if age_ms > ms(MAX_RECOMMENDED_AGE) {
            report.warnings.push(format!("credential is {} days old", age_ms / 86_400_000));
            report.remediation.push("rotate the credential".into());
        }
        if let (Some(_), Some(until)) =
            (credential.previous_in_grace(now), credential.previous_expiry_ms)
        {
            report.warnings.push(format!("previous credential accepted until {until} (epoch ms)"));
            report.remediation.push("roll the new credential out to every agent".into());
        }
        if self.config.signing_mode == SigningMode::Soft {
            report.warnings.push("request signatures are not enforced".into());
            report.remediation.push("sign agent requests, then start with --signing-mode enforced".into());
        }
        report
    }
}

#[cfg(test)]
#[path = "authority_tests.rs"]
mod tests;
