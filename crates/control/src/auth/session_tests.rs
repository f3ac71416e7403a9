// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::ManualClock;
use crate::store::MemoryStore;

const SECRET: &[u8] = b"session-secret-for-tests-0123456789abcdef";
const T0: u64 = 1_700_000_000_000;

fn manager(config: SessionConfig) -> (SessionManager, Arc<ManualClock>, Arc<MemoryStore>) {
    let clock = ManualClock::new(T0);
    let store = Arc::new(MemoryStore::new());
    let sessions = SessionManager::new(SECRET, store.clone(), clock.clone(), config);
    (sessions, clock, store)
}

#[test]
fn access_token_round_trips_subject_and_role() -> anyhow::Result<()> {
    let (sessions, _, _) = manager(SessionConfig::default());
    let access = sessions.issue_access_token("alice", Role::Viewer)?;
    assert_eq!(access.expires_at_ms, T0 + 15 * 60_000);

    let operator = sessions.verify_access_token(&access.token)?;
    assert_eq!(operator, Operator::new("alice", Role::Viewer));
    Ok(())
}

#[test]
fn access_token_expires_on_the_injected_clock() -> anyhow::Result<()> {
    let (sessions, clock, _) = manager(SessionConfig::default());
    let access = sessions.issue_access_token("alice", Role::Admin)?;

    clock.set(access.expires_at_ms - 1_000);
    sessions.verify_access_token(&access.token)?;
    clock.set(access.expires_at_ms);
    assert!(matches!(
        sessions.verify_access_token(&access.token),
        Err(SessionError::ExpiredAccessToken)
    ));
    Ok(())
}

#[test]
fn access_token_from_other_secret_is_rejected() -> anyhow::Result<()> {
    let (sessions, _, _) = manager(SessionConfig::default());
    let clock = ManualClock::new(T0);
    let other = SessionManager::new(
        b"a-completely-different-secret-0000000000",
        Arc::new(MemoryStore::new()),
        clock,
        SessionConfig::default(),
    );
    let foreign = other.issue_access_token("mallory", Role::Admin)?;

    assert!(matches!(
        sessions.verify_access_token(&foreign.token),
        Err(SessionError::InvalidAccessToken)
    ));
    assert!(matches!(
        sessions.verify_access_token("not.a.jwt"),
        Err(SessionError::InvalidAccessToken)
    ));
    Ok(())
}

#[test]
fn only_the_hash_is_stored() -> anyhow::Result<()> {
    let (sessions, _, store) = manager(SessionConfig::default());
    let issued = sessions.issue_refresh("alice", Role::Admin)?;

    assert!(store.find_refresh(&issued.value)?.is_none());
    let record = store.find_refresh(&hash_refresh(&issued.value))?;
    assert_eq!(record.map(|r| r.owner_id), Some("alice".to_owned()));
    Ok(())
}

#[test]
fn refresh_hash_is_hex_sha256() {
    assert_eq!(
        hash_refresh("abc"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn verify_rejects_unknown_and_expired() -> anyhow::Result<()> {
    let (sessions, clock, _) = manager(SessionConfig::default());
    assert!(matches!(sessions.verify("never-issued"), Err(SessionError::InvalidRefresh)));

    let issued = sessions.issue_refresh("alice", Role::Admin)?;
    sessions.verify(&issued.value)?;
    clock.set(issued.expires_at_ms);
    assert!(matches!(sessions.verify(&issued.value), Err(SessionError::ExpiredRefresh)));
    Ok(())
}

#[test]
fn rotation_chain_rejects_every_superseded_value() -> anyhow::Result<()> {
    let (sessions, clock, _) = manager(SessionConfig::default());
    let mut current = sessions.issue_refresh("alice", Role::Admin)?.value;
    let mut superseded = Vec::new();
    for _ in 0..5 {
        clock.advance(Duration::from_secs(60));
        let pair = sessions.rotate(&current)?;
        assert_eq!(pair.operator, Operator::new("alice", Role::Admin));
        superseded.push(std::mem::replace(&mut current, pair.refresh.value));
    }

    for old in &superseded {
        assert!(matches!(sessions.verify(old), Err(SessionError::RevokedRefresh)));
    }
    sessions.verify(&current)?;
    Ok(())
}

#[test]
fn reuse_revokes_all_owner_sessions() -> anyhow::Result<()> {
    let (sessions, _, _) = manager(SessionConfig::default());
    let stolen = sessions.issue_refresh("alice", Role::Admin)?.value;
    let other_device = sessions.issue_refresh("alice", Role::Admin)?.value;
    let bob = sessions.issue_refresh("bob", Role::Viewer)?.value;

    let legit = sessions.rotate(&stolen)?;
    assert!(matches!(sessions.rotate(&stolen), Err(SessionError::RefreshReused)));

    assert!(sessions.verify(&legit.refresh.value).is_err());
    assert!(sessions.verify(&other_device).is_err());
    sessions.verify(&bob)?;
    Ok(())
}

#[test]
fn revoke_is_idempotent() -> anyhow::Result<()> {
    let (sessions, _, _) = manager(SessionConfig::default());
    let issued = sessions.issue_refresh("alice", Role::Admin)?;

    assert!(sessions.revoke(&issued.value)?);
    assert!(!sessions.revoke(&issued.value)?);
    assert!(!sessions.revoke("never-issued")?);
    assert!(matches!(sessions.verify(&issued.value), Err(SessionError::RevokedRefresh)));
    Ok(())
}

#[test]
fn rotation_rate_only_logged_by_default() -> anyhow::Result<()> {
    let config = SessionConfig { rotation_threshold: 2, ..SessionConfig::default() };
    let (sessions, _, _) = manager(config);
    let mut current = sessions.issue_refresh("alice", Role::Admin)?.value;
    for _ in 0..4 {
        current = sessions.rotate(&current)?.refresh.value;
    }
    Ok(())
}

#[test]
fn rotation_rate_enforced_when_configured() -> anyhow::Result<()> {
    let config =
        SessionConfig { rotation_threshold: 2, enforce_rate: true, ..SessionConfig::default() };
    let (sessions, clock, _) = manager(config);
    let mut current = sessions.issue_refresh("alice", Role::Admin)?.value;
    current = sessions.rotate(&current)?.refresh.value;
    current = sessions.rotate(&current)?.refresh.value;

    let result = sessions.rotate(&current);
    assert!(
        matches!(result, Err(SessionError::AnomalousRefreshRate { ref subject, count: 3 }) if subject == "alice"),
        "{result:?}"
    );
    // The blocked value was not consumed and works once the window slides.
    clock.advance(Duration::from_secs(3600));
    sessions.rotate(&current)?;
    Ok(())
}

#[test]
fn purge_removes_expired_records() -> anyhow::Result<()> {
    let (sessions, clock, _) = manager(SessionConfig::default());
    sessions.issue_refresh("alice", Role::Admin)?;
    clock.advance(Duration::from_secs(3 * 24 * 3600));
    sessions.issue_refresh("alice", Role::Admin)?;

    clock.advance(Duration::from_secs(5 * 24 * 3600));
    assert_eq!(sessions.purge_expired()?, 1);
    Ok(())
}
