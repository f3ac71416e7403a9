// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TTL cache in front of the credential row.
//!
//! Heartbeats validate the credential at high frequency; the cache keeps those
//! reads off the store. On a miss exactly one reader refreshes from the store
//! while concurrent readers reuse the most recent known row.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::store::{AgentCredential, CredentialStore, StoreError};

struct Cached {
    credential: AgentCredential,
    fetched_at_ms: u64,
}

pub struct CredentialCache {
    slot: RwLock<Option<Cached>>,
    ttl_ms: u64,
    loading: AtomicBool,
}

/// Clears the in-flight flag even if the store read fails.
struct LoadingGuard<'a>(&'a AtomicBool);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CredentialCache {
    pub fn new(ttl_ms: u64) -> Self {
        Self { slot: RwLock::new(None), ttl_ms, loading: AtomicBool::new(false) }
    }

    /// Current credential, served from cache while fresh.
    ///
    /// A store failure is returned to the caller unless another reader is
    /// already refreshing and a previous row is known.
    pub fn get(
        &self,
        store: &dyn CredentialStore,
        now_ms: u64,
    ) -> Result<Option<AgentCredential>, StoreError> {
        let stale = {
            let slot = self.slot.read();
            match slot.as_ref() {
                Some(c) if now_ms.saturating_sub(c.fetched_at_ms) < self.ttl_ms => {
                    return Ok(Some(c.credential.clone()));
                }
                Some(c) => Some(c.credential.clone()),
                None => None,
            }
        };

        let claimed =
            self.loading.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok();
        if !claimed {
            if let Some(known) = stale {
                return Ok(Some(known));
            }
        }
        let _guard = claimed.then(|| LoadingGuard(&self.loading));

        let loaded = store.load_credential()?;
        match loaded {
            Some(ref credential) => self.put(credential.clone(), now_ms),
            None => self.invalidate(),
        }
        Ok(loaded)
    }

    /// Write-through after a local mutation (bootstrap, rotation).
    pub fn put(&self, credential: AgentCredential, now_ms: u64) {
        *self.slot.write() = Some(Cached { credential, fetched_at_ms: now_ms });
    }

    pub fn invalidate(&self) {
        *self.slot.write() = None;
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
