// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topic-addressed realtime channel between the control plane and agents.
//!
//! Every agent owns a command subject; every fan-out session owns a result
//! subject that agents reply on. Subjects follow NATS conventions
//! (dot-separated tokens, `*` matches one token, `>` matches the rest), so the
//! same subjects work against a NATS server ([`nats::NatsChannel`]) or the
//! in-process hub ([`local::LocalChannel`]).

pub mod local;
pub mod nats;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;

pub use local::LocalChannel;
pub use nats::NatsChannel;

/// A message received from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub subject: String,
    pub payload: Bytes,
}

pub type MessageStream = Pin<Box<dyn Stream<Item = ChannelMessage> + Send>>;

pub type ChannelFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ChannelError>> + Send + 'a>>;

/// Delivery failure for a single publish. Never fatal to a fan-out session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("no subscriber on {0}")]
    NoSubscribers(String),
    #[error("invalid subject: {0}")]
    InvalidSubject(String),
    #[error("channel closed")]
    Closed,
    #[error("nats: {0}")]
    Nats(String),
}

/// Bidirectional, topic-addressed transport.
pub trait RealtimeChannel: Send + Sync {
    fn publish(&self, subject: String, payload: Bytes) -> ChannelFuture<'_, ()>;

    /// Subscribe to a subject pattern (`*` and `>` wildcards allowed).
    fn subscribe(&self, pattern: String) -> ChannelFuture<'_, MessageStream>;
}

/// Subject layout under a configurable prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subjects {
    prefix: String,
}

impl Subjects {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `{prefix}.agent.{agent_id}.command`
    pub fn agent_command(&self, agent_id: &str) -> String {
        format!("{}.agent.{agent_id}.command", self.prefix)
    }

    /// `{prefix}.session.{session_id}.results`
    pub fn session_results(&self, session_id: &str) -> String {
        format!("{}.session.{session_id}.results", self.prefix)
    }

    /// Pattern matching every session's result subject.
    pub fn all_session_results(&self) -> String {
        format!("{}.session.*.results", self.prefix)
    }

    /// Extract the session id from a `{prefix}.session.{id}.results` subject.
    pub fn parse_session_results<'a>(&self, subject: &'a str) -> Option<&'a str> {
        let rest = subject.strip_prefix(self.prefix.as_str())?.strip_prefix(".session.")?;
        let id = rest.strip_suffix(".results")?;
        if is_subject_token(id) {
            Some(id)
        } else {
            None
        }
    }
}

/// True if `token` can be embedded as a single subject token.
pub fn is_subject_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= 128
        && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// True if `prefix` is one or more valid tokens joined by dots.
pub fn is_subject_prefix(prefix: &str) -> bool {
    !prefix.is_empty() && prefix.split('.').all(is_subject_token)
}

/// NATS-style subject matching.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut subject_tokens = subject.split('.');
    for pat in pattern.split('.') {
        match pat {
            ">" => return subject_tokens.next().is_some(),
            "*" => {
                if subject_tokens.next().is_none() {
                    return false;
                }
            }
            literal => {
                if subject_tokens.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    subject_tokens.next().is_none()
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
