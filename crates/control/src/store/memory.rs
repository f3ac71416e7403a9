// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory implementation of every store trait.
//!
//! Each table sits behind its own lock so a slow heartbeat append never
//! contends with a credential read. The credential row is optionally mirrored
//! to disk via [`crate::store::persist`].

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::liveness::{AgentMetadata, AgentStatus};
use crate::store::persist;
use crate::store::{
    AgentCredential, AgentRecord, AgentStore, CredentialStore, DiagnosticRecord, HeartbeatRecord,
    HistoryStore, PurgeCounts, RefreshRecord, RefreshStore, StoreError,
};

#[derive(Default)]
pub struct MemoryStore {
    credential: Mutex<Option<AgentCredential>>,
    credential_path: Option<PathBuf>,
    refresh: Mutex<HashMap<String, RefreshRecord>>,
    agents: Mutex<HashMap<String, AgentRecord>>,
    heartbeats: Mutex<VecDeque<HeartbeatRecord>>,
    diagnostics: Mutex<VecDeque<DiagnosticRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store whose credential row is persisted under `state_dir`.
    pub fn open(state_dir: &Path) -> Result<Self, StoreError> {
        let path = persist::credential_path(state_dir);
        let credential = persist::load(&path)?;
        if credential.is_some() {
            tracing::info!(path = %path.display(), "loaded persisted agent credential");
        }
        Ok(Self { credential: Mutex::new(credential), credential_path: Some(path), ..Self::new() })
    }

    pub fn heartbeat_count(&self) -> usize {
        self.heartbeats.lock().len()
    }

    pub fn diagnostic_count(&self) -> usize {
        self.diagnostics.lock().len()
    }

    fn flush_credential(&self, credential: &AgentCredential) -> Result<(), StoreError> {
        match self.credential_path {
            Some(ref path) => persist::save(path, credential),
            None => Ok(()),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn load_credential(&self) -> Result<Option<AgentCredential>, StoreError> {
        Ok(self.credential.lock().clone())
    }

    fn save_credential(&self, credential: &AgentCredential) -> Result<(), StoreError> {
        let mut slot = self.credential.lock();
        self.flush_credential(credential)?;
        *slot = Some(credential.clone());
        Ok(())
    }

    fn record_usage(&self, uses: u64, last_used_at_ms: u64) -> Result<(), StoreError> {
        let mut slot = self.credential.lock();
        let cred = slot.as_mut().ok_or_else(|| StoreError::NotFound("agent credential".into()))?;
        cred.usage_count = cred.usage_count.saturating_add(uses);
        cred.last_used_at_ms =
            Some(cred.last_used_at_ms.map_or(last_used_at_ms, |prev| prev.max(last_used_at_ms)));
        let snapshot = cred.clone();
        self.flush_credential(&snapshot)
    }
}

impl RefreshStore for MemoryStore {
    fn insert_refresh(&self, record: RefreshRecord) -> Result<(), StoreError> {
        self.refresh.lock().insert(record.hash.clone(), record);
        Ok(())
    }

    fn find_refresh(&self, hash: &str) -> Result<Option<RefreshRecord>, StoreError> {
        Ok(self.refresh.lock().get(hash).cloned())
    }

    fn swap_refresh(&self, old_hash: &str, next: RefreshRecord) -> Result<bool, StoreError> {
        let mut table = self.refresh.lock();
        match table.get_mut(old_hash) {
            Some(old) if !old.revoked => old.revoked = true,
            _ => return Ok(false),
        }
        table.insert(next.hash.clone(), next);
        Ok(true)
    }

    fn revoke_refresh(&self, hash: &str) -> Result<bool, StoreError> {
        let mut table = self.refresh.lock();
        match table.get_mut(hash) {
            Some(rec) if !rec.revoked => {
                rec.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn revoke_owner(&self, owner_id: &str) -> Result<usize, StoreError> {
        let mut revoked = 0;
        for rec in self.refresh.lock().values_mut() {
            if rec.owner_id == owner_id && !rec.revoked {
                rec.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    fn purge_expired_refresh(&self, now_ms: u64) -> Result<usize, StoreError> {
        let mut table = self.refresh.lock();
        let before = table.len();
        // Revoked records are kept until expiry so reuse stays detectable.
        table.retain(|_, rec| rec.expires_at_ms > now_ms);
        Ok(before - table.len())
    }
}

impl AgentStore for MemoryStore {
    fn upsert_agent(
        &self,
        id: &str,
        metadata: AgentMetadata,
        now_ms: u64,
    ) -> Result<AgentRecord, StoreError> {
        let mut agents = self.agents.lock();
        let record = agents
            .entry(id.to_owned())
            .and_modify(|rec| rec.metadata = metadata.clone())
            .or_insert_with(|| AgentRecord {
                id: id.to_owned(),
                status: AgentStatus::Unknown,
                last_seen_at_ms: None,
                registered_at_ms: now_ms,
                metadata,
            });
        Ok(record.clone())
    }

    fn get_agent(&self, id: &str) -> Result<Option<AgentRecord>, StoreError> {
        Ok(self.agents.lock().get(id).cloned())
    }

    fn list_agents(&self) -> Result<Vec<AgentRecord>, StoreError> {
        let mut list: Vec<AgentRecord> = self.agents.lock().values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    fn touch_agent(&self, id: &str, now_ms: u64) -> Result<AgentStatus, StoreError> {
        let mut agents = self.agents.lock();
        let rec = agents.get_mut(id).ok_or_else(|| StoreError::NotFound(format!("agent {id}")))?;
        let prev = rec.status;
        rec.status = AgentStatus::Online;
        rec.last_seen_at_ms = Some(rec.last_seen_at_ms.map_or(now_ms, |seen| seen.max(now_ms)));
        Ok(prev)
    }

    fn mark_offline_if_stale(&self, id: &str, cutoff_ms: u64) -> Result<bool, StoreError> {
        let mut agents = self.agents.lock();
        let Some(rec) = agents.get_mut(id) else {
            return Ok(false);
        };
        let stale = !matches!(rec.last_seen_at_ms, Some(seen) if seen >= cutoff_ms);
        if rec.status == AgentStatus::Online && stale {
            rec.status = AgentStatus::Offline;
            return Ok(true);
        }
        Ok(false)
    }

    fn mark_online_if_recent(&self, id: &str, cutoff_ms: u64) -> Result<bool, StoreError> {
        let mut agents = self.agents.lock();
        let Some(rec) = agents.get_mut(id) else {
            return Ok(false);
        };
        let recent = rec.last_seen_at_ms.is_some_and(|seen| seen >= cutoff_ms);
        if rec.status == AgentStatus::Offline && recent {
            rec.status = AgentStatus::Online;
            return Ok(true);
        }
        Ok(false)
    }

    fn update_metadata(&self, id: &str, metadata: AgentMetadata) -> Result<(), StoreError> {
        let mut agents = self.agents.lock();
        let rec = agents.get_mut(id).ok_or_else(|| StoreError::NotFound(format!("agent {id}")))?;
        rec.metadata = metadata;
        Ok(())
    }
}

impl HistoryStore for MemoryStore {
    fn append_heartbeat(&self, record: HeartbeatRecord) -> Result<(), StoreError> {
        self.heartbeats.lock().push_back(record);
        Ok(())
    }

    fn append_diagnostic(&self, record: DiagnosticRecord) -> Result<(), StoreError> {
        self.diagnostics.lock().push_back(record);
        Ok(())
    }

    fn purge_before(&self, cutoff_ms: u64) -> Result<PurgeCounts, StoreError> {
        let mut heartbeats = self.heartbeats.lock();
        let before = heartbeats.len();
        heartbeats.retain(|r| r.received_at_ms >= cutoff_ms);
        let heartbeats_removed = before - heartbeats.len();
        drop(heartbeats);

        let mut diagnostics = self.diagnostics.lock();
        let before = diagnostics.len();
        diagnostics.retain(|r| r.received_at_ms >= cutoff_ms);
        Ok(PurgeCounts { heartbeats: heartbeats_removed, diagnostics: before - diagnostics.len() })
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
