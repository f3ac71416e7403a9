// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HMAC-SHA256 request signatures and the nonce cache used for replay rejection.
//!
//! Signing input is `"{timestamp}.{body}"` keyed with the agent credential.

use indexmap::IndexMap;
use ring::hmac;

/// Default upper bound on remembered nonces.
pub const DEFAULT_NONCE_CAPACITY: usize = 100_000;

/// Longest nonce accepted from an agent.
pub const MAX_NONCE_LEN: usize = 128;

fn signing_input(timestamp: &str, body: &[u8]) -> Vec<u8> {
    let mut input = Vec::with_capacity(timestamp.len() + 1 + body.len());
    input.extend_from_slice(timestamp.as_bytes());
    input.push(b'.');
    input.extend_from_slice(body);
    input
}

/// Compute the lowercase hex signature an agent would send.
pub fn sign(key: &str, timestamp: &str, body: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key.as_bytes());
    let tag = hmac::sign(&key, &signing_input(timestamp, body));
    hex::encode(tag.as_ref())
}

/// Verify `signature_hex` against `key` in constant time.
pub fn verify(key: &str, timestamp: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(tag) = hex::decode(signature_hex) else {
        return false;
    };
    let key = hmac::Key::new(hmac::HMAC_SHA256, key.as_bytes());
    hmac::verify(&key, &signing_input(timestamp, body), &tag).is_ok()
}

/// Outcome of offering a nonce to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceCheck {
    Fresh,
    /// Already seen and not yet expired.
    Replayed,
    /// Every slot holds a live nonce; nothing was recorded.
    Full,
}

/// Bounded set of recently seen nonces with per-entry expiry.
///
/// Live entries are never evicted: when the cache is full of unexpired
/// nonces new ones are refused. Expiry follows the request timestamp, so
/// insertion order is only roughly expiry order.
pub struct NonceCache {
    map: IndexMap<String, u64>,
    capacity: usize,
}

impl NonceCache {
    pub fn new(capacity: usize) -> Self {
        Self { map: IndexMap::new(), capacity }
    }

    /// Record `nonce` until `expires_at_ms`.
    pub fn check_and_insert(&mut self, nonce: &str, now_ms: u64, expires_at_ms: u64) -> NonceCheck {
        self.reap_front(now_ms);
        if let Some(&expiry) = self.map.get(nonce) {
            if expiry > now_ms {
                return NonceCheck::Replayed;
            }
            self.map.shift_remove(nonce);
        }
        if self.map.len() >= self.capacity {
            self.purge(now_ms);
            if self.map.len() >= self.capacity {
                return NonceCheck::Full;
            }
        }
        self.map.insert(nonce.to_owned(), expires_at_ms);
        NonceCheck::Fresh
    }

    /// Drop every entry whose expiry has passed.
    pub fn purge(&mut self, now_ms: u64) -> usize {
        let before = self.map.len();
        self.map.retain(|_, expiry| *expiry > now_ms);
        before - self.map.len()
    }

    /// Cheap lazy reap of expired entries at the front.
    fn reap_front(&mut self, now_ms: u64) {
        while self.map.first().is_some_and(|(_, &expiry)| expiry <= now_ms) {
            self.map.shift_remove_index(0);
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
