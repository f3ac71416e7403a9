// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::auth::Role;
use crate::liveness::HeartbeatMetrics;

fn refresh(hash: &str, owner: &str) -> RefreshRecord {
    RefreshRecord {
        owner_id: owner.to_owned(),
        role: Role::Viewer,
        hash: hash.to_owned(),
        expires_at_ms: 10_000,
        revoked: false,
        created_at_ms: 0,
    }
}

#[test]
fn swap_refresh_succeeds_once() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.insert_refresh(refresh("a", "alice"))?;

    assert!(store.swap_refresh("a", refresh("b", "alice"))?);
    // Second swap of the same value loses and inserts nothing.
    assert!(!store.swap_refresh("a", refresh("c", "alice"))?);
    assert!(store.find_refresh("c")?.is_none());
    assert!(store.find_refresh("a")?.is_some_and(|r| r.revoked));
    assert!(store.find_refresh("b")?.is_some_and(|r| !r.revoked));
    Ok(())
}

#[test]
fn revoke_owner_only_touches_that_owner() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.insert_refresh(refresh("a1", "alice"))?;
    store.insert_refresh(refresh("a2", "alice"))?;
    store.insert_refresh(refresh("b1", "bob"))?;

    assert_eq!(store.revoke_owner("alice")?, 2);
    assert!(store.find_refresh("b1")?.is_some_and(|r| !r.revoked));
    assert!(!store.revoke_refresh("a1")?, "already revoked");
    Ok(())
}

#[test]
fn offline_transition_is_conditional_on_last_seen() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.upsert_agent("relay-1", AgentMetadata::default(), 0)?;
    store.touch_agent("relay-1", 5_000)?;

    // A heartbeat landed after the sweep computed its cutoff.
    assert!(!store.mark_offline_if_stale("relay-1", 5_000)?);
    assert!(store.mark_offline_if_stale("relay-1", 5_001)?);
    assert_eq!(store.get_agent("relay-1")?.map(|a| a.status), Some(AgentStatus::Offline));

    assert!(!store.mark_online_if_recent("relay-1", 5_001)?);
    assert!(store.mark_online_if_recent("relay-1", 4_000)?);
    Ok(())
}

#[test]
fn unknown_agents_are_never_swept_offline() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.upsert_agent("fresh", AgentMetadata::default(), 0)?;
    assert!(!store.mark_offline_if_stale("fresh", u64::MAX)?);
    assert_eq!(store.get_agent("fresh")?.map(|a| a.status), Some(AgentStatus::Unknown));
    Ok(())
}

#[test]
fn purge_before_drops_old_history() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    for ts in [100, 200, 300] {
        store.append_heartbeat(HeartbeatRecord {
            agent_id: "a".into(),
            received_at_ms: ts,
            metrics: HeartbeatMetrics::default(),
        })?;
    }
    store.append_diagnostic(DiagnosticRecord {
        agent_id: "a".into(),
        received_at_ms: 50,
        session_id: None,
        target: None,
        success: true,
        latency_ms: Some(12.0),
        error: None,
    })?;

    let counts = store.purge_before(250)?;
    assert_eq!(counts, PurgeCounts { heartbeats: 2, diagnostics: 1 });
    assert_eq!(store.heartbeat_count(), 1);
    assert_eq!(store.diagnostic_count(), 0);
    Ok(())
}

#[test]
fn credential_row_survives_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let store = MemoryStore::open(dir.path())?;
        assert!(store.load_credential()?.is_none());
        store.save_credential(&AgentCredential::new("mk_live_persisted".into(), 42))?;
        store.record_usage(3, 99)?;
    }

    let reopened = MemoryStore::open(dir.path())?;
    let cred = reopened.load_credential()?.ok_or_else(|| anyhow::anyhow!("missing row"))?;
    assert_eq!(cred.current_value, "mk_live_persisted");
    assert_eq!(cred.usage_count, 3);
    assert_eq!(cred.last_used_at_ms, Some(99));
    Ok(())
}
