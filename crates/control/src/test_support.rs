// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: an in-process control plane and assertion helpers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::channel::LocalChannel;
use crate::clock::ManualClock;
use crate::config::ControlConfig;
use crate::credential::AgentAuth;
use crate::liveness::AgentMetadata;
use crate::state::{Backends, ControlState};
use crate::store::{AgentRecord, MemoryStore};

/// Start of every test clock (2023-11-14).
pub const TEST_EPOCH_MS: u64 = 1_700_000_000_000;

/// A control plane wired to in-memory backends and a manual clock.
pub struct TestControl {
    pub state: Arc<ControlState>,
    pub store: Arc<MemoryStore>,
    pub channel: Arc<LocalChannel>,
    pub clock: Arc<ManualClock>,
}

impl TestControl {
    /// Build from [`ControlConfig::test`].
    pub fn new() -> anyhow::Result<Self> {
        Self::with_config(ControlConfig::test())
    }

    /// Build from `config` and install its agent key.
    pub fn with_config(config: ControlConfig) -> anyhow::Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let channel = Arc::new(LocalChannel::new());
        let clock = ManualClock::new(TEST_EPOCH_MS);
        let backends = Backends::memory(Arc::clone(&store), channel.clone(), clock.clone());
        let agent_key = config.agent_key.clone();
        let state = Arc::new(ControlState::new(config, backends, CancellationToken::new()));
        state.authority.bootstrap(agent_key.as_deref())?;
        Ok(Self { state, store, channel, clock })
    }

    /// The agent credential currently installed.
    pub fn agent_key(&self) -> &str {
        self.state.config.agent_key.as_deref().unwrap_or_default()
    }

    /// Register `id` with the installed key and no signature.
    pub fn register(&self, id: &str) -> anyhow::Result<AgentRecord> {
        let auth = AgentAuth { credential: Some(self.agent_key()), signature: None, body: b"{}" };
        Ok(self.state.liveness.register(Some(id), auth, AgentMetadata::default())?)
    }
}

/// Serve the full router on a random local port.
pub async fn spawn_http_server(
    state: Arc<ControlState>,
) -> anyhow::Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    let router = crate::transport::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, handle))
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
