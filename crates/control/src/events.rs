// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane event types and the broadcast hub that fans them out.
//!
//! The liveness tracker, credential authority and fan-out coordinator all
//! emit into one [`EventHub`]; `/ws/events` clients subscribe to it. Emitting
//! never blocks: with no subscribers the event is simply dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::fanout::EntryStatus;
use crate::liveness::NetworkInfo;

/// Events emitted by the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    /// An agent transitioned to `ONLINE`.
    AgentOnline { agent: String },
    /// An offline sweep moved an agent to `OFFLINE`.
    AgentOffline { agent: String },
    /// An agent reported different network metadata than last time.
    NetworkChanged {
        agent: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous: Option<NetworkInfo>,
        current: NetworkInfo,
    },
    /// The shared agent credential was rotated.
    CredentialRotated { grace_until_ms: u64 },
    /// One fan-out entry left `pending`.
    EntryResolved {
        session: String,
        agent: String,
        status: EntryStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        latency_ms: Option<f64>,
    },
    /// Every entry of a session is terminal.
    SessionCompleted { session: String, success: usize, failed: usize, timeout: usize },
}

impl ControlEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentOnline { .. } => "agent_online",
            Self::AgentOffline { .. } => "agent_offline",
            Self::NetworkChanged { .. } => "network_changed",
            Self::CredentialRotated { .. } => "credential_rotated",
            Self::EntryResolved { .. } => "entry_resolved",
            Self::SessionCompleted { .. } => "session_completed",
        }
    }
}

/// Event hub: fans out control events to downstream subscribers via broadcast.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<ControlEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn emit(&self, event: ControlEvent) {
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
