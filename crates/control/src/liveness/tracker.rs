// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::{ms, SharedClock};
use crate::credential::{AgentAuth, CredentialAuthority};
use crate::events::{ControlEvent, EventHub};
use crate::liveness::{
    valid_agent_id, AgentMetadata, AgentStatus, DiagnosticReport, HeartbeatMetrics,
    LivenessError,
};
use crate::store::{
    AgentRecord, AgentStore, DiagnosticRecord, HeartbeatRecord, HistoryStore, PurgeCounts,
};

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Agents silent for longer than this are swept offline.
    pub offline_threshold: Duration,
    /// Heartbeat and diagnostic rows older than this are deleted.
    pub retention: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            offline_threshold: Duration::from_secs(10 * 60),
            retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatAck {
    pub agent_id: String,
    pub status: AgentStatus,
    pub previous: AgentStatus,
    pub received_at_ms: u64,
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub transitioned: usize,
    pub failures: usize,
}

pub struct LivenessTracker {
    agents: Arc<dyn AgentStore>,
    history: Arc<dyn HistoryStore>,
    authority: Arc<CredentialAuthority>,
    clock: SharedClock,
    events: EventHub,
    config: LivenessConfig,
}

impl LivenessTracker {
    pub fn new(
        agents: Arc<dyn AgentStore>,
        history: Arc<dyn HistoryStore>,
        authority: Arc<CredentialAuthority>,
        clock: SharedClock,
        events: EventHub,
        config: LivenessConfig,
    ) -> Self {
        Self { agents, history, authority, clock, events, config }
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Register (or re-register) an agent and mark it online.
    ///
    /// Agents that don't propose an id get a generated one.
    pub fn register(
        &self,
        agent_id: Option<&str>,
        auth: AgentAuth<'_>,
        metadata: AgentMetadata,
    ) -> Result<AgentRecord, LivenessError> {
        self.authority.authenticate(auth)?;
        let id = match agent_id {
            Some(id) if valid_agent_id(id) => id.to_owned(),
            Some(id) => return Err(LivenessError::InvalidAgentId(id.to_owned())),
            None => format!("agent-{}", uuid::Uuid::new_v4().simple()),
        };

        let now = self.clock.now_ms();
        let record = self.agents.upsert_agent(&id, metadata, now)?;
        let previous = self.agents.touch_agent(&id, now)?;
        if previous != AgentStatus::Online {
            self.events.emit(ControlEvent::AgentOnline { agent: id.clone() });
        }
        info!(agent_id = %id, %previous, hostname = ?record.metadata.hostname, "agent registered");
        Ok(AgentRecord { status: AgentStatus::Online, last_seen_at_ms: Some(now), ..record })
    }

    /// Record a heartbeat. Store failures fail the call so the agent retries.
    pub fn heartbeat(
        &self,
        agent_id: &str,
        auth: AgentAuth<'_>,
        metrics: HeartbeatMetrics,
    ) -> Result<HeartbeatAck, LivenessError> {
        self.authority.authenticate(auth)?;
        let record = self
            .agents
            .get_agent(agent_id)?
            .ok_or_else(|| LivenessError::UnknownAgent(agent_id.to_owned()))?;

        let now = self.clock.now_ms();
        let previous = self.agents.touch_agent(agent_id, now)?;
        let reported_network = metrics.network.clone();
        self.history.append_heartbeat(HeartbeatRecord {
            agent_id: agent_id.to_owned(),
            received_at_ms: now,
            metrics,
        })?;

        if previous != AgentStatus::Online {
            info!(agent_id, %previous, "agent online");
            self.events.emit(ControlEvent::AgentOnline { agent: agent_id.to_owned() });
        }
        if let Some(current) = reported_network {
            if record.metadata.network.as_ref() != Some(&current) {
                self.network_changed(record, current);
            }
        }
        debug!(agent_id, "heartbeat");
        Ok(HeartbeatAck {
            agent_id: agent_id.to_owned(),
            status: AgentStatus::Online,
            previous,
            received_at_ms: now,
        })
    }

    /// Store a diagnostic result pushed by an agent.
    pub fn report_diagnostic(
        &self,
        agent_id: &str,
        auth: AgentAuth<'_>,
        report: DiagnosticReport,
    ) -> Result<DiagnosticRecord, LivenessError> {
        self.authority.authenticate(auth)?;
        if self.agents.get_agent(agent_id)?.is_none() {
            return Err(LivenessError::UnknownAgent(agent_id.to_owned()));
        }
        let record = DiagnosticRecord {
            agent_id: agent_id.to_owned(),
            received_at_ms: self.clock.now_ms(),
            session_id: report.session_id,
            target: report.target,
            success: report.success,
            latency_ms: report.latency_ms,
            error: report.error,
        };
        self.history.append_diagnostic(record.clone())?;
        Ok(record)
    }

    /// Move every `ONLINE` agent silent for longer than `threshold` to `OFFLINE`.
    pub fn offline_sweep(&self, threshold: Duration) -> SweepReport {
        let now = self.clock.now_ms();
        let cutoff = now.saturating_sub(ms(threshold));
        let mut report = SweepReport::default();
        let Some(agents) = self.snapshot("offline") else {
            report.failures = 1;
            return report;
        };

        for agent in agents {
            report.examined += 1;
            if agent.status != AgentStatus::Online
                || agent.last_seen_at_ms.is_some_and(|seen| seen >= cutoff)
            {
                continue;
            }
            // Conditional write: a heartbeat racing this pass wins.
            match self.agents.mark_offline_if_stale(&agent.id, cutoff) {
                Ok(true) => {
                    report.transitioned += 1;
                    info!(agent_id = %agent.id, last_seen_at_ms = ?agent.last_seen_at_ms, "agent offline");
                    self.events.emit(ControlEvent::AgentOffline { agent: agent.id });
                }
                Ok(false) => {}
                Err(e) => {
                    report.failures += 1;
                    warn!(agent_id = %agent.id, err = %e, "offline sweep failed for agent");
                }
            }
        }
        report
    }

    /// Correct agents left `OFFLINE` despite a heartbeat within the threshold.
    pub fn recovery_sweep(&self) -> SweepReport {
        let now = self.clock.now_ms();
        let cutoff = now.saturating_sub(ms(self.config.offline_threshold));
        let mut report = SweepReport::default();
        let Some(agents) = self.snapshot("recovery") else {
            report.failures = 1;
            return report;
        };

        for agent in agents {
            report.examined += 1;
            if agent.status != AgentStatus::Offline
                || !agent.last_seen_at_ms.is_some_and(|seen| seen >= cutoff)
            {
                continue;
            }
            match self.agents.mark_online_if_recent(&agent.id, cutoff) {
                Ok(true) => {
                    report.transitioned += 1;
                    warn!(agent_id = %agent.id, "agent was offline despite a recent heartbeat; restored");
                    self.events.emit(ControlEvent::AgentOnline { agent: agent.id });
                }
                Ok(false) => {}
                Err(e) => {
                    report.failures += 1;
                    warn!(agent_id = %agent.id, err = %e, "recovery sweep failed for agent");
                }
            }
        }
        report
    }

    /// Delete heartbeat and diagnostic rows older than `retention`.
    pub fn retention_sweep(&self, retention: Duration) -> PurgeCounts {
        let cutoff = self.clock.now_ms().saturating_sub(ms(retention));
        match self.history.purge_before(cutoff) {
            Ok(counts) => {
                if counts.heartbeats + counts.diagnostics > 0 {
                    info!(
                        heartbeats = counts.heartbeats,
                        diagnostics = counts.diagnostics,
                        "retention sweep purged history"
                    );
                }
                counts
            }
            Err(e) => {
                warn!(err = %e, "retention sweep failed");
                PurgeCounts::default()
            }
        }
    }

    pub fn list(&self) -> Result<Vec<AgentRecord>, LivenessError> {
        Ok(self.agents.list_agents()?)
    }

    pub fn get(&self, agent_id: &str) -> Result<AgentRecord, LivenessError> {
        self.agents
            .get_agent(agent_id)?
            .ok_or_else(|| LivenessError::UnknownAgent(agent_id.to_owned()))
    }

    /// Ids of every agent currently `ONLINE`.
    pub fn online_agents(&self) -> Result<Vec<String>, LivenessError> {
        Ok(self
            .agents
            .list_agents()?
            .into_iter()
            .filter(|a| a.status == AgentStatus::Online)
            .map(|a| a.id)
            .collect())
    }

    fn snapshot(&self, sweep: &str) -> Option<Vec<AgentRecord>> {
        match self.agents.list_agents() {
            Ok(agents) => Some(agents),
            Err(e) => {
                warn!(sweep, err = %e, "sweep could not list agents");
                None
            }
        }
    }

    /// Metadata enrichment is best-effort and never fails the heartbeat.
    fn network_changed(&self, record: AgentRecord, current: crate::liveness::NetworkInfo) {
        let previous = record.metadata.network.clone();
        let metadata = AgentMetadata { network: Some(current.clone()), ..record.metadata };
        if let Err(e) = self.agents.update_metadata(&record.id, metadata) {
            warn!(agent_id = %record.id, err = %e, "failed to store network change");
        }
        info!(agent_id = %record.id, ?previous, ?current, "agent network changed");
        self.events.emit(ControlEvent::NetworkChanged { agent: record.id, previous, current });
    }
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;
