// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-demand diagnostic fan-out: one command to many agents, replies
//! aggregated per session under a deadline.

pub mod coordinator;
pub mod session;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelError;
use crate::liveness::LivenessError;

pub use coordinator::{FanoutConfig, FanoutCoordinator, IngestOutcome, SessionStart, StartRequest};
pub use session::{Entry, SessionResults, TestSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Success,
    Failed,
    Timeout,
}

impl EntryStatus {
    pub fn is_terminal(self) -> bool {
        self != Self::Pending
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    #[default]
    Latency,
}

/// Published on `{prefix}.agent.{agent_id}.command`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiagnosticCommand {
    pub session_id: String,
    pub agent_id: String,
    pub kind: CommandKind,
    pub target: String,
    pub probes: u32,
    pub timeout_ms: u64,
    /// Subject the agent publishes its [`DiagnosticReply`] on.
    pub reply_to: String,
    pub issued_at_ms: u64,
}

/// Published by an agent on the session's result subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiagnosticReply {
    pub session_id: String,
    pub agent_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("session belongs to another operator")]
    Forbidden,
    #[error("invalid deadline: {0}")]
    InvalidDeadline(String),
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("dispatch task failed: {0}")]
    Dispatch(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Liveness(#[from] LivenessError),
}
