// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::*;
use crate::store::MemoryStore;

/// Counts reads and can be switched into an unavailable state.
struct CountingStore {
    inner: MemoryStore,
    reads: AtomicUsize,
    down: AtomicBool,
}

impl CountingStore {
    fn with(value: &str) -> anyhow::Result<Self> {
        let inner = MemoryStore::new();
        inner.save_credential(&AgentCredential::new(value.to_owned(), 0))?;
        Ok(Self { inner, reads: AtomicUsize::new(0), down: AtomicBool::new(false) })
    }
}

impl CredentialStore for CountingStore {
    fn load_credential(&self) -> Result<Option<AgentCredential>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("down".into()));
        }
        self.inner.load_credential()
    }

    fn save_credential(&self, credential: &AgentCredential) -> Result<(), StoreError> {
        self.inner.save_credential(credential)
    }

    fn record_usage(&self, uses: u64, last_used_at_ms: u64) -> Result<(), StoreError> {
        self.inner.record_usage(uses, last_used_at_ms)
    }
}

#[test]
fn fresh_entries_skip_the_store() -> anyhow::Result<()> {
    let store = CountingStore::with("mk_live_cached")?;
    let cache = CredentialCache::new(1_000);

    cache.get(&store, 0)?;
    cache.get(&store, 500)?;
    cache.get(&store, 999)?;
    assert_eq!(store.reads.load(Ordering::SeqCst), 1);

    cache.get(&store, 1_000)?;
    assert_eq!(store.reads.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn concurrent_miss_reuses_last_known_value() -> anyhow::Result<()> {
    let store = CountingStore::with("mk_live_known")?;
    let cache = CredentialCache::new(10);
    cache.get(&store, 0)?;

    // Another reader holds the in-flight slot.
    cache.loading.store(true, Ordering::SeqCst);
    let got = cache.get(&store, 100)?;
    assert_eq!(got.map(|c| c.current_value), Some("mk_live_known".to_owned()));
    assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn store_failure_without_known_value_is_an_error() -> anyhow::Result<()> {
    let store = CountingStore::with("mk_live_x")?;
    store.down.store(true, Ordering::SeqCst);
    let cache = CredentialCache::new(10);

    assert!(cache.get(&store, 0).is_err());
    // The in-flight flag is released after the failed read.
    assert!(!cache.loading.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn stale_value_is_not_served_when_the_refresh_fails() -> anyhow::Result<()> {
    let store = CountingStore::with("mk_live_x")?;
    let cache = CredentialCache::new(10);
    cache.get(&store, 0)?;

    store.down.store(true, Ordering::SeqCst);
    assert!(cache.get(&store, 50).is_err(), "can't verify must not mean verified");
    Ok(())
}
