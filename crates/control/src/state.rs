// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::SessionManager;
use crate::channel::{RealtimeChannel, Subjects};
use crate::clock::SharedClock;
use crate::config::ControlConfig;
use crate::credential::CredentialAuthority;
use crate::events::EventHub;
use crate::fanout::FanoutCoordinator;
use crate::liveness::LivenessTracker;
use crate::store::{AgentStore, CredentialStore, HistoryStore, MemoryStore, RefreshStore};

/// External collaborators the control plane is built on.
pub struct Backends {
    pub credentials: Arc<dyn CredentialStore>,
    pub refresh: Arc<dyn RefreshStore>,
    pub agents: Arc<dyn AgentStore>,
    pub history: Arc<dyn HistoryStore>,
    pub channel: Arc<dyn RealtimeChannel>,
    pub clock: SharedClock,
}

impl Backends {
    /// Back every table with one [`MemoryStore`].
    pub fn memory(
        store: Arc<MemoryStore>,
        channel: Arc<dyn RealtimeChannel>,
        clock: SharedClock,
    ) -> Self {
        Self {
            credentials: Arc::clone(&store) as Arc<dyn CredentialStore>,
            refresh: Arc::clone(&store) as Arc<dyn RefreshStore>,
            agents: Arc::clone(&store) as Arc<dyn AgentStore>,
            history: store,
            channel,
            clock,
        }
    }
}

/// Shared control-plane state.
pub struct ControlState {
    pub config: ControlConfig,
    pub clock: SharedClock,
    /// Broadcast hub for `/ws/events` clients.
    pub events: EventHub,
    pub authority: Arc<CredentialAuthority>,
    pub sessions: SessionManager,
    pub liveness: Arc<LivenessTracker>,
    pub fanout: Arc<FanoutCoordinator>,
    /// Command and result transport shared with the coordinator.
    pub channel: Arc<dyn RealtimeChannel>,
    pub subjects: Subjects,
    pub shutdown: CancellationToken,
}

impl ControlState {
    pub fn new(config: ControlConfig, backends: Backends, shutdown: CancellationToken) -> Self {
        let events = EventHub::new();
        let clock = backends.clock;

        let authority = Arc::new(CredentialAuthority::new(
            backends.credentials,
            Arc::clone(&clock),
            config.authority(),
            events.clone(),
        ));
        let sessions = SessionManager::new(
            config.session_secret_bytes(),
            backends.refresh,
            Arc::clone(&clock),
            config.sessions(),
        );
        let liveness = Arc::new(LivenessTracker::new(
            backends.agents,
            backends.history,
            Arc::clone(&authority),
            Arc::clone(&clock),
            events.clone(),
            config.liveness(),
        ));
        let subjects = Subjects::new(config.nats_prefix.clone());
        let fanout = Arc::new(FanoutCoordinator::new(
            Arc::clone(&backends.channel),
            subjects.clone(),
            Arc::clone(&liveness),
            Arc::clone(&clock),
            events.clone(),
            config.fanout(),
        ));

        Self {
            config,
            clock,
            events,
            authority,
            sessions,
            liveness,
            fanout,
            channel: backends.channel,
            subjects,
            shutdown,
        }
    }
}
