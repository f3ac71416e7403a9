// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! meshctl: control plane for a fleet of diagnostic agents.
//!
//! Agents authenticate with one shared, rotatable credential, report
//! liveness over HTTP and receive fan-out commands over a realtime channel.
//! Operators hold short-lived access tokens backed by rotating refresh
//! credentials.

pub mod auth;
pub mod channel;
pub mod clock;
pub mod config;
pub mod credential;
pub mod error;
pub mod events;
pub mod fanout;
pub mod liveness;
pub mod state;
pub mod store;
pub mod sweeper;
pub mod test_support;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::channel::nats::NatsSettings;
use crate::channel::{LocalChannel, NatsChannel, RealtimeChannel};
use crate::clock::SystemClock;
use crate::config::ControlConfig;
use crate::credential::authority::BootstrapOutcome;
use crate::state::{Backends, ControlState};
use crate::store::MemoryStore;
use crate::sweeper::{
    spawn_offline_sweeper, spawn_recovery_sweeper, spawn_retention_sweeper, spawn_session_gc,
};
use crate::transport::build_router;

/// Run the control plane until shutdown.
pub async fn run(config: ControlConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let store = match config.state_dir {
        Some(ref dir) => MemoryStore::open(dir)?,
        None => MemoryStore::new(),
    };
    let channel: Arc<dyn RealtimeChannel> = match config.nats_url {
        Some(ref url) => {
            let settings = NatsSettings { url: url.clone(), token: config.nats_token.clone() };
            Arc::new(NatsChannel::connect(&settings).await?)
        }
        None => {
            info!("no --nats-url; agents take commands over /ws/agents/{{id}}");
            Arc::new(LocalChannel::new())
        }
    };
    let backends = Backends::memory(Arc::new(store), channel, Arc::new(SystemClock));
    let state = Arc::new(ControlState::new(config.clone(), backends, shutdown.clone()));

    match state.authority.bootstrap(config.agent_key.as_deref())? {
        BootstrapOutcome::Loaded => info!("agent credential loaded"),
        BootstrapOutcome::Installed => info!("agent credential installed from configuration"),
        BootstrapOutcome::Generated { value } => {
            // The only time the generated value is ever shown.
            warn!("generated agent credential, distribute it to agents now: {value}");
        }
    }
    let report = state.authority.security_check()?;
    for warning in &report.warnings {
        warn!(warning = %warning, "agent credential security check");
    }

    spawn_offline_sweeper(Arc::clone(&state));
    spawn_recovery_sweeper(Arc::clone(&state));
    spawn_retention_sweeper(Arc::clone(&state));
    spawn_session_gc(Arc::clone(&state));
    state.fanout.spawn_ingest_loop(shutdown.clone()).await?;

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown requested"),
                Err(e) => warn!(err = %e, "failed to listen for ctrl-c; shutting down"),
            }
            shutdown.cancel();
        });
    }

    info!(
        signing_mode = %state.authority.signing_mode(),
        "meshctl listening on {addr}"
    );
    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    state.authority.flush_usage();
    info!("meshctl stopped");
    Ok(())
}
