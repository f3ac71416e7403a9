// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fan-out coordinator.
//!
//! Each session resolves through one completion token, cancelled by whichever
//! happens first: the last pending entry resolving, or the deadline task
//! timing out the rest. Dispatch never waits for replies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::join_all;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::Operator;
use crate::channel::{RealtimeChannel, Subjects};
use crate::clock::{ms, SharedClock};
use crate::events::{ControlEvent, EventHub};
use crate::fanout::session::{SessionResults, TestSession};
use crate::fanout::{CommandKind, DiagnosticCommand, DiagnosticReply, EntryStatus, FanoutError};
use crate::liveness::{valid_agent_id, LivenessTracker};

#[derive(Debug, Clone)]
pub struct FanoutConfig {
    pub default_deadline: Duration,
    pub max_deadline: Duration,
    /// Completed sessions are dropped this long after completion.
    pub idle_expiry: Duration,
    pub probes: u32,
    pub probe_timeout: Duration,
    /// Length of the fastest-agents list in results.
    pub top_n: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            default_deadline: Duration::from_secs(30),
            max_deadline: Duration::from_secs(120),
            idle_expiry: Duration::from_secs(3600),
            probes: 4,
            probe_timeout: Duration::from_secs(10),
            top_n: 5,
        }
    }
}

/// Operator request to start a session.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    /// Explicit agents; `None` targets every online agent.
    pub agents: Option<Vec<String>>,
    /// What the agents should probe.
    pub target: String,
    pub deadline: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStart {
    pub session_id: String,
    pub target_count: usize,
    pub deadline_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Resolved(EntryStatus),
    /// Duplicate, late or unknown agent; nothing changed.
    Ignored,
}

struct SessionSlot {
    session: Mutex<TestSession>,
    /// Cancelled once every entry is terminal.
    completed: CancellationToken,
    deadline: Duration,
}

pub struct FanoutCoordinator {
    channel: Arc<dyn RealtimeChannel>,
    subjects: Subjects,
    liveness: Arc<LivenessTracker>,
    clock: SharedClock,
    events: EventHub,
    config: FanoutConfig,
    sessions: Mutex<HashMap<String, Arc<SessionSlot>>>,
}

impl FanoutCoordinator {
    pub fn new(
        channel: Arc<dyn RealtimeChannel>,
        subjects: Subjects,
        liveness: Arc<LivenessTracker>,
        clock: SharedClock,
        events: EventHub,
        config: FanoutConfig,
    ) -> Self {
        Self {
            channel,
            subjects,
            liveness,
            clock,
            events,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create a session and arm its deadline. Commands are not sent yet.
    pub fn start_session(
        self: &Arc<Self>,
        owner: &Operator,
        request: StartRequest,
    ) -> Result<SessionStart, FanoutError> {
        let deadline = request.deadline.unwrap_or(self.config.default_deadline);
        if deadline.is_zero() || deadline > self.config.max_deadline {
            return Err(FanoutError::InvalidDeadline(format!(
                "{}ms (allowed 1..={}ms)",
                deadline.as_millis(),
                self.config.max_deadline.as_millis()
            )));
        }
        if request.target.trim().is_empty() {
            return Err(FanoutError::InvalidTarget("empty probe target".into()));
        }

        let agents = match request.agents {
            Some(agents) => {
                if let Some(bad) = agents.iter().find(|a| !valid_agent_id(a)) {
                    return Err(FanoutError::InvalidTarget(format!("agent id {bad:?}")));
                }
                agents
            }
            None => self.liveness.online_agents()?,
        };

        let now = self.clock.now_ms();
        let session_id = uuid::Uuid::new_v4().to_string();
        let deadline_at_ms = now.saturating_add(ms(deadline));
        let session = TestSession::new(
            session_id.clone(),
            owner.subject.clone(),
            request.target,
            agents,
            now,
            deadline_at_ms,
        );
        let target_count = session.len();
        let slot = Arc::new(SessionSlot {
            completed: CancellationToken::new(),
            session: Mutex::new(session),
            deadline,
        });
        self.sessions.lock().insert(session_id.clone(), Arc::clone(&slot));

        info!(
            session_id = %session_id,
            owner = %owner.subject,
            targets = target_count,
            deadline_ms = ms(deadline),
            "fan-out session started"
        );
        if target_count == 0 {
            slot.completed.cancel();
            self.events.emit(ControlEvent::SessionCompleted {
                session: session_id.clone(),
                success: 0,
                failed: 0,
                timeout: 0,
            });
        } else {
            self.arm_deadline(session_id.clone(), slot);
        }
        Ok(SessionStart { session_id, target_count, deadline_at_ms })
    }

    /// Publish the command to every target concurrently. A failed publish
    /// resolves only that entry as `failed`.
    pub async fn dispatch(&self, session_id: &str) -> Result<usize, FanoutError> {
        let slot = self.slot(session_id)?;
        let (commands, reply_to) = {
            let session = slot.session.lock();
            let reply_to = self.subjects.session_results(&session.id);
            let issued_at_ms = self.clock.now_ms();
            let commands: Vec<(String, DiagnosticCommand)> = session
                .agents()
                .map(|agent| {
                    let command = DiagnosticCommand {
                        session_id: session.id.clone(),
                        agent_id: agent.to_owned(),
                        kind: CommandKind::Latency,
                        target: session.target.clone(),
                        probes: self.config.probes,
                        timeout_ms: ms(self.config.probe_timeout.min(slot.deadline)),
                        reply_to: reply_to.clone(),
                        issued_at_ms,
                    };
                    (agent.to_owned(), command)
                })
                .collect();
            (commands, reply_to)
        };

        let sends = commands.into_iter().map(|(agent, command)| async move {
            let result = match serde_json::to_vec(&command) {
                Ok(payload) => {
                    let subject = self.subjects.agent_command(&agent);
                    self.channel.publish(subject, Bytes::from(payload)).await.map_err(|e| e.to_string())
                }
                Err(e) => Err(e.to_string()),
            };
            (agent, result)
        });

        let mut published = 0;
        for (agent, result) in join_all(sends).await {
            match result {
                Ok(()) => published += 1,
                Err(e) => {
                    warn!(session_id, agent_id = %agent, err = %e, "command dispatch failed");
                    self.resolve(
                        &slot,
                        &agent,
                        EntryStatus::Failed,
                        None,
                        Some(format!("dispatch failed: {e}")),
                    );
                }
            }
        }
        debug!(session_id, published, reply_to = %reply_to, "commands dispatched");
        Ok(published)
    }

    /// `start_session` then `dispatch`.
    ///
    /// Dispatch runs on its own task: dropping the returned future (an
    /// operator disconnecting) does not stop commands from going out.
    pub async fn launch(
        self: &Arc<Self>,
        owner: &Operator,
        request: StartRequest,
    ) -> Result<SessionStart, FanoutError> {
        let started = self.start_session(owner, request)?;
        if started.target_count > 0 {
            let this = Arc::clone(self);
            let session_id = started.session_id.clone();
            tokio::spawn(async move { this.dispatch(&session_id).await })
                .await
                .map_err(|e| FanoutError::Dispatch(e.to_string()))??;
        }
        Ok(started)
    }

    /// Apply an agent reply. Replies for terminal entries are no-ops.
    pub fn ingest(&self, reply: DiagnosticReply) -> Result<IngestOutcome, FanoutError> {
        let slot = self.slot(&reply.session_id)?;
        let (status, latency_ms) = if reply.success {
            let measured = slot.session.lock().started.elapsed().as_micros() as f64 / 1000.0;
            let reported = reply.latency_ms.filter(|l| l.is_finite() && *l >= 0.0);
            (EntryStatus::Success, Some(reported.unwrap_or(measured)))
        } else {
            (EntryStatus::Failed, None)
        };

        if self.resolve(&slot, &reply.agent_id, status, latency_ms, reply.error) {
            Ok(IngestOutcome::Resolved(status))
        } else {
            debug!(
                session_id = %reply.session_id,
                agent_id = %reply.agent_id,
                "ignored reply for terminal or unknown entry"
            );
            Ok(IngestOutcome::Ignored)
        }
    }

    /// Snapshot plus derived statistics. Visible to the owner or any admin.
    pub fn get_results(
        &self,
        session_id: &str,
        viewer: &Operator,
    ) -> Result<SessionResults, FanoutError> {
        let slot = self.slot(session_id)?;
        let session = slot.session.lock();
        if session.owner_id != viewer.subject && !viewer.is_admin() {
            return Err(FanoutError::Forbidden);
        }
        Ok(session.results(self.config.top_n))
    }

    /// Resolve once the session is complete (all terminal or deadline).
    pub async fn wait(&self, session_id: &str) -> Result<(), FanoutError> {
        let slot = self.slot(session_id)?;
        slot.completed.cancelled().await;
        Ok(())
    }

    /// Drop sessions that completed more than the idle expiry ago.
    pub fn gc(&self) -> usize {
        let cutoff = self.clock.now_ms().saturating_sub(ms(self.config.idle_expiry));
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, slot| {
            !matches!(slot.session.lock().completed_at_ms, Some(done) if done <= cutoff)
        });
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, remaining = sessions.len(), "fan-out sessions collected");
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    fn slot(&self, session_id: &str) -> Result<Arc<SessionSlot>, FanoutError> {
        self.sessions
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| FanoutError::UnknownSession(session_id.to_owned()))
    }

    /// Resolve one entry; completes the session if it was the last pending one.
    fn resolve(
        &self,
        slot: &SessionSlot,
        agent: &str,
        status: EntryStatus,
        latency_ms: Option<f64>,
        error: Option<String>,
    ) -> bool {
        let now = self.clock.now_ms();
        let mut session = slot.session.lock();
        if !session.resolve(agent, status, latency_ms, error, now) {
            return false;
        }
        self.events.emit(ControlEvent::EntryResolved {
            session: session.id.clone(),
            agent: agent.to_owned(),
            status,
            latency_ms,
        });
        if session.finish_if_done(now) {
            self.complete(&session, &slot.completed);
        }
        true
    }

    fn complete(&self, session: &TestSession, completed: &CancellationToken) {
        let counts = session.counts();
        info!(
            session_id = %session.id,
            success = counts.success,
            failed = counts.failed,
            timeout = counts.timeout,
            "fan-out session complete"
        );
        self.events.emit(ControlEvent::SessionCompleted {
            session: session.id.clone(),
            success: counts.success,
            failed: counts.failed,
            timeout: counts.timeout,
        });
        completed.cancel();
    }

    /// One-shot deadline timer, cancelled early by completion.
    fn arm_deadline(self: &Arc<Self>, session_id: String, slot: Arc<SessionSlot>) {
        let this = Arc::clone(self);
        let deadline = slot.session.lock().started + slot.deadline;
        tokio::spawn(async move {
            tokio::select! {
                _ = slot.completed.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }
            let now = this.clock.now_ms();
            let mut session = slot.session.lock();
            let expired = session.expire(now);
            for agent in &expired {
                this.events.emit(ControlEvent::EntryResolved {
                    session: session_id.clone(),
                    agent: agent.clone(),
                    status: EntryStatus::Timeout,
                    latency_ms: None,
                });
            }
            if !expired.is_empty() {
                info!(session_id = %session_id, timed_out = expired.len(), "fan-out deadline reached");
            }
            if session.finish_if_done(now) {
                this.complete(&session, &slot.completed);
            }
        });
    }

    /// Subscribe to every session result subject and feed replies into
    /// [`Self::ingest`] until `shutdown` fires.
    pub async fn spawn_ingest_loop(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> Result<(), FanoutError> {
        let mut stream = self.channel.subscribe(self.subjects.all_session_results()).await?;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = stream.next() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                };
                let Some(session_id) = this.subjects.parse_session_results(&msg.subject) else {
                    continue;
                };
                let reply: DiagnosticReply = match serde_json::from_slice(&msg.payload) {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!(subject = %msg.subject, err = %e, "malformed diagnostic reply");
                        continue;
                    }
                };
                if reply.session_id != session_id {
                    warn!(
                        subject = %msg.subject,
                        claimed = %reply.session_id,
                        "reply session does not match its subject"
                    );
                    continue;
                }
                if let Err(e) = this.ingest(reply) {
                    debug!(err = %e, "reply dropped");
                }
            }
            debug!("fan-out ingest loop stopped");
        });
        Ok(())
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
