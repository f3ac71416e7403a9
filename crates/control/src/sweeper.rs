// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background sweep loops: liveness, retention and fan-out session GC.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::state::ControlState;

/// Run `pass` every `period` until `shutdown` fires. The first pass runs
/// after one full period.
fn spawn_periodic<F>(name: &'static str, period: Duration, shutdown: CancellationToken, mut pass: F)
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut timer = tokio::time::interval_at(start, period);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            pass();
        }
        tracing::debug!(sweep = name, "sweeper stopped");
    });
}

/// Spawn the offline sweep: stale `ONLINE` agents become `OFFLINE`.
pub fn spawn_offline_sweeper(state: Arc<ControlState>) {
    let period = state.config.offline_sweep_interval();
    let threshold = state.config.offline_threshold();
    let shutdown = state.shutdown.clone();
    spawn_periodic("offline", period, shutdown, move || {
        let report = state.liveness.offline_sweep(threshold);
        if report.transitioned > 0 || report.failures > 0 {
            tracing::info!(
                examined = report.examined,
                offline = report.transitioned,
                failures = report.failures,
                "offline sweep"
            );
        }
    });
}

/// Spawn the recovery sweep that repairs agents stuck `OFFLINE`.
pub fn spawn_recovery_sweeper(state: Arc<ControlState>) {
    let period = state.config.recovery_sweep_interval();
    let shutdown = state.shutdown.clone();
    spawn_periodic("recovery", period, shutdown, move || {
        let report = state.liveness.recovery_sweep();
        if report.transitioned > 0 || report.failures > 0 {
            tracing::info!(
                examined = report.examined,
                recovered = report.transitioned,
                failures = report.failures,
                "recovery sweep"
            );
        }
    });
}

/// Spawn the retention sweep. Besides history rows it also drops expired
/// refresh records, reaps the nonce cache and clears an expired previous
/// agent credential.
pub fn spawn_retention_sweeper(state: Arc<ControlState>) {
    let period = state.config.retention_sweep_interval();
    let retention = state.config.retention();
    let shutdown = state.shutdown.clone();
    spawn_periodic("retention", period, shutdown, move || retention_pass(&state, retention));
}

/// Spawn the loop that drops fan-out sessions idle past their expiry.
pub fn spawn_session_gc(state: Arc<ControlState>) {
    let period = state.config.session_gc_interval();
    let shutdown = state.shutdown.clone();
    spawn_periodic("session-gc", period, shutdown, move || {
        state.fanout.gc();
    });
}

pub(crate) fn retention_pass(state: &ControlState, retention: Duration) {
    state.liveness.retention_sweep(retention);
    match state.sessions.purge_expired() {
        Ok(0) => {}
        Ok(n) => tracing::debug!(purged = n, "expired refresh records removed"),
        Err(e) => tracing::warn!(err = %e, "refresh purge failed"),
    }
    let nonces = state.authority.purge_nonces();
    if nonces > 0 {
        tracing::debug!(purged = nonces, "expired nonces reaped");
    }
    if let Err(e) = state.authority.collect_expired_previous() {
        tracing::warn!(err = %e, "failed to clear expired previous credential");
    }
}

#[cfg(test)]
#[path = "sweeper_tests.rs"]
mod tests;
