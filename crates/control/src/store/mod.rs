// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistence seam for the control plane.
//!
//! Durable storage of credentials, operator refresh records, agents and their
//! history is owned by an external store. The core only talks to it through
//! the traits below; [`memory::MemoryStore`] implements all of them for
//! single-process deployments and tests.

pub mod memory;
pub mod persist;

use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::liveness::{AgentMetadata, AgentStatus, HeartbeatMetrics};

pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// The shared agent credential row.
///
/// `previous_value` stays acceptable only while `now < previous_expiry_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCredential {
    pub current_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_expiry_ms: Option<u64>,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotated_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at_ms: Option<u64>,
    #[serde(default)]
    pub usage_count: u64,
}

impl AgentCredential {
    pub fn new(value: String, now_ms: u64) -> Self {
        Self {
            current_value: value,
            previous_value: None,
            previous_expiry_ms: None,
            created_at_ms: now_ms,
            rotated_at_ms: None,
            last_used_at_ms: None,
            usage_count: 0,
        }
    }

    /// The rotated-out value, if its grace window is still open.
    pub fn previous_in_grace(&self, now_ms: u64) -> Option<&str> {
        match (&self.previous_value, self.previous_expiry_ms) {
            (Some(prev), Some(expiry)) if now_ms < expiry => Some(prev),
            _ => None,
        }
    }

    /// Candidate values accepted at `now_ms`, current first.
    pub fn candidates(&self, now_ms: u64) -> Vec<&str> {
        let mut out = vec![self.current_value.as_str()];
        out.extend(self.previous_in_grace(now_ms));
        out
    }
}

/// Stored half of an operator refresh credential. Only the hash is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRecord {
    pub owner_id: String,
    pub role: Role,
    pub hash: String,
    pub expires_at_ms: u64,
    pub revoked: bool,
    pub created_at_ms: u64,
}

/// A registered agent as seen by the liveness tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at_ms: Option<u64>,
    pub registered_at_ms: u64,
    #[serde(default)]
    pub metadata: AgentMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub agent_id: String,
    pub received_at_ms: u64,
    pub metrics: HeartbeatMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub agent_id: String,
    pub received_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Rows removed by a retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeCounts {
    pub heartbeats: usize,
    pub diagnostics: usize,
}

pub trait CredentialStore: Send + Sync {
    fn load_credential(&self) -> Result<Option<AgentCredential>, StoreError>;
    fn save_credential(&self, credential: &AgentCredential) -> Result<(), StoreError>;
    /// Add `uses` to the usage counter and stamp `last_used_at_ms`.
    fn record_usage(&self, uses: u64, last_used_at_ms: u64) -> Result<(), StoreError>;
}

pub trait RefreshStore: Send + Sync {
    fn insert_refresh(&self, record: RefreshRecord) -> Result<(), StoreError>;
    fn find_refresh(&self, hash: &str) -> Result<Option<RefreshRecord>, StoreError>;
    /// Revoke `old_hash` and insert `next` as one step.
    ///
    /// Returns `false` (and inserts nothing) when `old_hash` is unknown or
    /// already revoked, so two concurrent rotations of the same value cannot
    /// both succeed.
    fn swap_refresh(&self, old_hash: &str, next: RefreshRecord) -> Result<bool, StoreError>;
    /// Returns `true` if the record existed and was live.
    fn revoke_refresh(&self, hash: &str) -> Result<bool, StoreError>;
    fn revoke_owner(&self, owner_id: &str) -> Result<usize, StoreError>;
    fn purge_expired_refresh(&self, now_ms: u64) -> Result<usize, StoreError>;
}

pub trait AgentStore: Send + Sync {
    /// Insert a new agent in `UNKNOWN` state, or refresh metadata of an existing one.
    fn upsert_agent(
        &self,
        id: &str,
        metadata: AgentMetadata,
        now_ms: u64,
    ) -> Result<AgentRecord, StoreError>;
    fn get_agent(&self, id: &str) -> Result<Option<AgentRecord>, StoreError>;
    fn list_agents(&self) -> Result<Vec<AgentRecord>, StoreError>;
    /// Set `ONLINE` and `last_seen_at_ms = now_ms`. Returns the prior status.
    fn touch_agent(&self, id: &str, now_ms: u64) -> Result<AgentStatus, StoreError>;
    /// `ONLINE → OFFLINE` only if `last_seen_at_ms < cutoff_ms` at write time.
    fn mark_offline_if_stale(&self, id: &str, cutoff_ms: u64) -> Result<bool, StoreError>;
    /// `OFFLINE → ONLINE` only if `last_seen_at_ms >= cutoff_ms` at write time.
    fn mark_online_if_recent(&self, id: &str, cutoff_ms: u64) -> Result<bool, StoreError>;
    fn update_metadata(&self, id: &str, metadata: AgentMetadata) -> Result<(), StoreError>;
}

pub trait HistoryStore: Send + Sync {
    fn append_heartbeat(&self, record: HeartbeatRecord) -> Result<(), StoreError>;
    fn append_diagnostic(&self, record: DiagnosticRecord) -> Result<(), StoreError>;
    fn purge_before(&self, cutoff_ms: u64) -> Result<PurgeCounts, StoreError>;
}
