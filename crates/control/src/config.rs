// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::auth::SessionConfig;
use crate::credential::{check_supplied, is_unsafe_value, AuthorityConfig, SigningMode};
use crate::fanout::FanoutConfig;
use crate::liveness::LivenessConfig;

/// Minimum length of the operator session signing secret.
pub const MIN_SESSION_SECRET_LEN: usize = 32;

/// Upper bound on any fan-out session deadline (one day).
pub const MAX_SESSION_DEADLINE_SECS: u64 = 86_400;

/// Agent control plane: credentials, liveness and diagnostic fan-out.
#[derive(Debug, Clone, Parser)]
#[command(name = "meshctl", version, about)]
pub struct ControlConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "MESHCTL_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9700, env = "MESHCTL_PORT")]
    pub port: u16,

    /// Static admin bearer token, exchanged for a session at login.
    #[arg(long, env = "MESHCTL_ADMIN_TOKEN")]
    pub admin_token: Option<String>,

    /// HS256 secret for operator access tokens (required).
    #[arg(long, env = "MESHCTL_SESSION_SECRET", hide_env_values = true)]
    pub session_secret: Option<String>,

    /// Initial agent credential. Generated at first boot when unset.
    #[arg(long, env = "MESHCTL_AGENT_KEY", hide_env_values = true)]
    pub agent_key: Option<String>,

    /// Hours a rotated-out agent credential stays valid.
    #[arg(long, default_value_t = 24, env = "MESHCTL_GRACE_HOURS")]
    pub grace_hours: u64,

    /// Minimum seconds between credential usage writes.
    #[arg(long, default_value_t = 60, env = "MESHCTL_USAGE_WRITE_INTERVAL_SECS")]
    pub usage_write_interval_secs: u64,

    /// Seconds a cached credential row is trusted.
    #[arg(long, default_value_t = 30, env = "MESHCTL_CREDENTIAL_CACHE_TTL_SECS")]
    pub credential_cache_ttl_secs: u64,

    /// Whether unsigned agent requests are accepted.
    #[arg(long, value_enum, default_value_t = SigningMode::Soft, env = "MESHCTL_SIGNING_MODE")]
    pub signing_mode: SigningMode,

    /// Accepted clock skew for signed requests, in seconds.
    #[arg(long, default_value_t = 300, env = "MESHCTL_SIGNATURE_TTL_SECS")]
    pub signature_ttl_secs: u64,

    /// Operator access token lifetime in minutes.
    #[arg(long, default_value_t = 15, env = "MESHCTL_ACCESS_TOKEN_TTL_MINS")]
    pub access_token_ttl_mins: u64,

    /// Operator refresh credential lifetime in days.
    #[arg(long, default_value_t = 7, env = "MESHCTL_REFRESH_TTL_DAYS")]
    pub refresh_ttl_days: u64,

    /// Refresh rotations per operator per hour before warning.
    #[arg(long, default_value_t = 100, env = "MESHCTL_REFRESH_ROTATION_THRESHOLD")]
    pub refresh_rotation_threshold: usize,

    /// Reject refresh rotations above the threshold.
    #[arg(long, env = "MESHCTL_ENFORCE_REFRESH_RATE")]
    pub enforce_refresh_rate: bool,

    /// Minutes without a heartbeat before an agent is swept offline.
    #[arg(long, default_value_t = 10, env = "MESHCTL_OFFLINE_THRESHOLD_MINS")]
    pub offline_threshold_mins: u64,

    /// Days of heartbeat and diagnostic history to keep.
    #[arg(long, default_value_t = 7, env = "MESHCTL_RETENTION_DAYS")]
    pub retention_days: u64,

    /// Offline sweep interval in milliseconds.
    #[arg(long, default_value_t = 300_000, env = "MESHCTL_OFFLINE_SWEEP_MS")]
    pub offline_sweep_ms: u64,

    /// Recovery sweep interval in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "MESHCTL_RECOVERY_SWEEP_MS")]
    pub recovery_sweep_ms: u64,

    /// Retention sweep interval in milliseconds.
    #[arg(long, default_value_t = 3_600_000, env = "MESHCTL_RETENTION_SWEEP_MS")]
    pub retention_sweep_ms: u64,

    /// Default fan-out deadline in seconds.
    #[arg(long, default_value_t = 30, env = "MESHCTL_SESSION_DEADLINE_SECS")]
    pub session_deadline_secs: u64,

    /// Largest deadline an operator may request, in seconds.
    #[arg(long, default_value_t = 120, env = "MESHCTL_MAX_SESSION_DEADLINE_SECS")]
    pub max_session_deadline_secs: u64,

    /// Seconds a completed fan-out session is kept.
    #[arg(long, default_value_t = 3600, env = "MESHCTL_SESSION_IDLE_EXPIRY_SECS")]
    pub session_idle_expiry_secs: u64,

    /// Fan-out session GC interval in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "MESHCTL_SESSION_GC_MS")]
    pub session_gc_ms: u64,

    /// Probes per latency check.
    #[arg(long, default_value_t = 4, env = "MESHCTL_PROBE_COUNT")]
    pub probe_count: u32,

    /// Per-check timeout sent to agents, in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "MESHCTL_PROBE_TIMEOUT_MS")]
    pub probe_timeout_ms: u64,

    /// NATS server URL. Without one an in-process hub is used.
    #[arg(long, env = "MESHCTL_NATS_URL")]
    pub nats_url: Option<String>,

    /// NATS auth token.
    #[arg(long, env = "MESHCTL_NATS_TOKEN", hide_env_values = true)]
    pub nats_token: Option<String>,

    /// Subject prefix for agent commands and session results.
    #[arg(long, default_value = "meshctl", env = "MESHCTL_NATS_PREFIX")]
    pub nats_prefix: String,

    /// Directory for the persisted agent credential.
    #[arg(long, env = "MESHCTL_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, default_value = "text", env = "MESHCTL_LOG_FORMAT")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "MESHCTL_LOG_LEVEL")]
    pub log_level: String,
}

impl ControlConfig {
    /// Validate the configuration after parsing. Failures are fatal.
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.session_secret.as_deref() {
            None => anyhow::bail!("--session-secret is required"),
            Some(secret) if secret.len() < MIN_SESSION_SECRET_LEN => {
                anyhow::bail!("--session-secret must be at least {MIN_SESSION_SECRET_LEN} bytes")
            }
            Some(secret) if is_unsafe_value(secret) => {
                anyhow::bail!("--session-secret is a known placeholder value")
            }
            Some(_) => {}
        }

        if let Some(token) = self.admin_token.as_deref() {
            if token.len() < 16 || is_unsafe_value(token) {
                anyhow::bail!("--admin-token is too weak (min 16 chars, no placeholders)");
            }
        }
        if let Some(key) = self.agent_key.as_deref() {
            check_supplied(key).map_err(|e| anyhow::anyhow!("--agent-key rejected: {e}"))?;
        }

        if !crate::channel::is_subject_prefix(&self.nats_prefix) {
            anyhow::bail!("invalid --nats-prefix: {:?}", self.nats_prefix);
        }
        if self.session_deadline_secs == 0 || self.max_session_deadline_secs == 0 {
            anyhow::bail!("session deadlines must be positive");
        }
        if self.max_session_deadline_secs > MAX_SESSION_DEADLINE_SECS {
            anyhow::bail!("--max-session-deadline-secs may not exceed {MAX_SESSION_DEADLINE_SECS}");
        }
        if self.session_deadline_secs > self.max_session_deadline_secs {
            anyhow::bail!("--session-deadline-secs exceeds --max-session-deadline-secs");
        }
        if self.grace_hours == 0 {
            anyhow::bail!("--grace-hours must be positive");
        }
        if self.signature_ttl_secs == 0 {
            anyhow::bail!("--signature-ttl-secs must be positive");
        }
        for (name, ms) in [
            ("--offline-sweep-ms", self.offline_sweep_ms),
            ("--recovery-sweep-ms", self.recovery_sweep_ms),
            ("--retention-sweep-ms", self.retention_sweep_ms),
            ("--session-gc-ms", self.session_gc_ms),
        ] {
            if ms == 0 {
                anyhow::bail!("{name} must be positive");
            }
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    pub fn session_secret_bytes(&self) -> &[u8] {
        self.session_secret.as_deref().unwrap_or_default().as_bytes()
    }

    pub fn offline_threshold(&self) -> Duration {
        minutes(self.offline_threshold_mins)
    }

    pub fn retention(&self) -> Duration {
        days(self.retention_days)
    }

    pub fn offline_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.offline_sweep_ms)
    }

    pub fn recovery_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_sweep_ms)
    }

    pub fn retention_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.retention_sweep_ms)
    }

    pub fn session_gc_interval(&self) -> Duration {
        Duration::from_millis(self.session_gc_ms)
    }

    pub fn authority(&self) -> AuthorityConfig {
        AuthorityConfig {
            grace: hours(self.grace_hours),
            usage_write_interval: Duration::from_secs(self.usage_write_interval_secs),
            cache_ttl: Duration::from_secs(self.credential_cache_ttl_secs),
            signing_mode: self.signing_mode,
            signature_ttl: Duration::from_secs(self.signature_ttl_secs),
            ..AuthorityConfig::default()
        }
    }

    pub fn sessions(&self) -> SessionConfig {
        SessionConfig {
            access_ttl: minutes(self.access_token_ttl_mins),
            refresh_ttl: days(self.refresh_ttl_days),
            rotation_threshold: self.refresh_rotation_threshold,
            enforce_rate: self.enforce_refresh_rate,
        }
    }

    pub fn liveness(&self) -> LivenessConfig {
        LivenessConfig { offline_threshold: self.offline_threshold(), retention: self.retention() }
    }

    pub fn fanout(&self) -> FanoutConfig {
        FanoutConfig {
            default_deadline: Duration::from_secs(self.session_deadline_secs),
            max_deadline: Duration::from_secs(self.max_session_deadline_secs),
            idle_expiry: Duration::from_secs(self.session_idle_expiry_secs),
            probes: self.probe_count,
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            ..FanoutConfig::default()
        }
    }

    /// Build a deterministic config for tests (port 0, in-process channel).
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            admin_token: Some("test-admin-token-0123456789".into()),
            session_secret: Some("test-session-secret-0123456789abcdef".into()),
            agent_key: Some("mk_live_test-agent-credential-0123456789abcdef".into()),
            grace_hours: 24,
            usage_write_interval_secs: 60,
            credential_cache_ttl_secs: 30,
            signing_mode: SigningMode::Soft,
            signature_ttl_secs: 300,
            access_token_ttl_mins: 15,
            refresh_ttl_days: 7,
            refresh_rotation_threshold: 100,
            enforce_refresh_rate: false,
            offline_threshold_mins: 10,
            retention_days: 7,
            offline_sweep_ms: 300_000,
            recovery_sweep_ms: 60_000,
            retention_sweep_ms: 3_600_000,
            session_deadline_secs: 30,
            max_session_deadline_secs: 120,
            session_idle_expiry_secs: 3600,
            session_gc_ms: 60_000,
            probe_count: 4,
            probe_timeout_ms: 10_000,
            nats_url: None,
            nats_token: None,
            nats_prefix: "meshctl".into(),
            state_dir: None,
            log_format: "json".into(),
            log_level: "debug".into(),
        }
    }
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(60))
}

fn hours(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(3600))
}

fn days(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(24 * 3600))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
