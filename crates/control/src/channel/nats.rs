// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! NATS-backed realtime channel.
//!
//! Agents subscribe to `{prefix}.agent.{id}.command` and publish replies to
//! the `reply_to` subject carried in each command. The control plane holds a
//! single client shared by every publisher and the result subscriber.

use bytes::Bytes;
use futures_util::StreamExt;
use tracing::info;

use crate::channel::{ChannelError, ChannelFuture, ChannelMessage, MessageStream, RealtimeChannel};

/// Connection settings for the NATS channel.
#[derive(Debug, Clone)]
pub struct NatsSettings {
    pub url: String,
    pub token: Option<String>,
}

pub struct NatsChannel {
    client: async_nats::Client,
}

impl NatsChannel {
    /// Connect to the NATS server. Retries the initial connect in the background.
    pub async fn connect(settings: &NatsSettings) -> anyhow::Result<Self> {
        let mut opts = async_nats::ConnectOptions::new();
        if let Some(ref token) = settings.token {
            opts = opts.token(token.clone());
        }
        opts = opts.retry_on_initial_connect();

        info!(url = %settings.url, "connecting NATS channel");
        let client = opts.connect(&settings.url).await?;
        info!("NATS channel connected");
        Ok(Self { client })
    }
}

impl RealtimeChannel for NatsChannel {
    fn publish(&self, subject: String, payload: Bytes) -> ChannelFuture<'_, ()> {
        Box::pin(async move {
            self.client
                .publish(subject, payload)
                .await
                .map_err(|e| ChannelError::Nats(e.to_string()))
        })
    }

    fn subscribe(&self, pattern: String) -> ChannelFuture<'_, MessageStream> {
        Box::pin(async move {
            let sub = self
                .client
                .subscribe(pattern)
                .await
                .map_err(|e| ChannelError::Nats(e.to_string()))?;
            let stream = sub.map(|msg| ChannelMessage {
                subject: msg.subject.to_string(),
                payload: msg.payload,
            });
            Ok(Box::pin(stream) as MessageStream)
        })
    }
}
