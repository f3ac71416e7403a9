// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process topic hub used when no NATS server is configured.

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::channel::{
    subject_matches, ChannelError, ChannelFuture, ChannelMessage, MessageStream, RealtimeChannel,
};

struct Subscriber {
    pattern: String,
    tx: mpsc::UnboundedSender<ChannelMessage>,
}

/// Routes published messages to every live subscriber whose pattern matches.
#[derive(Default)]
pub struct LocalChannel {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl LocalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions (dropped streams are pruned lazily).
    pub fn subscriber_count(&self) -> usize {
        let mut subs = self.subscribers.lock();
        subs.retain(|s| !s.tx.is_closed());
        subs.len()
    }

    fn deliver(&self, subject: String, payload: Bytes) -> Result<(), ChannelError> {
        if subject.is_empty() || subject.contains(['*', '>', ' ']) {
            return Err(ChannelError::InvalidSubject(subject));
        }
        let mut subs = self.subscribers.lock();
        subs.retain(|s| !s.tx.is_closed());
        let mut delivered = 0usize;
        for sub in subs.iter().filter(|s| subject_matches(&s.pattern, &subject)) {
            let msg = ChannelMessage { subject: subject.clone(), payload: payload.clone() };
            if sub.tx.send(msg).is_ok() {
                delivered += 1;
            }
        }
        if delivered == 0 {
            return Err(ChannelError::NoSubscribers(subject));
        }
        Ok(())
    }
}

impl RealtimeChannel for LocalChannel {
    fn publish(&self, subject: String, payload: Bytes) -> ChannelFuture<'_, ()> {
        let result = self.deliver(subject, payload);
        Box::pin(async move { result })
    }

    fn subscribe(&self, pattern: String) -> ChannelFuture<'_, MessageStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(Subscriber { pattern, tx });
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });
        Box::pin(async move { Ok(Box::pin(stream) as MessageStream) })
    }
}
