//! TTL Cache
//!
//! A bounded in-memory cache with per-entry expiry. Reads bump recency;
//! inserts beyond capacity evict the least recently used entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

use super::clock::Clock;
use super::lock;

struct Entry<V> {
    value: V,
    expires_at: u64,
    last_used: u64,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    tick: u64,
}

pub struct TtlCache<V> {
    inner: Mutex<Inner<V>>,
    clock: Arc<dyn Clock>,
    ttl_ms: u64,
    max_entries: usize,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(clock: Arc<dyn Clock>, ttl_ms: u64, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tick: 0,
            }),
            clock,
            ttl_ms,
            max_entries: max_entries.max(1),
        }
    }

    /// Hex SHA-256 of `text`, used as a stable cache key.
    pub fn hash_key(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_ms();
        let mut inner = lock(&self.inner);
        inner.tick += 1;
        let tick = inner.tick;

        let expired = match inner.entries.get_mut(key) {
            None => return None,
            Some(entry) if now > entry.expires_at => true,
            Some(entry) => {
                entry.last_used = tick;
                return Some(entry.value.clone());
            }
        };
        if expired {
            inner.entries.remove(key);
        }
        None
    }

    pub fn set(&self, key: &str, value: V) {
        let now = self.clock.now_ms();
        let mut inner = lock(&self.inner);
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.entries.contains_key(key) && inner.entries.len() >= self.max_entries {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(k) = oldest {
                inner.entries.remove(&k);
            }
        }

        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now.saturating_add(self.ttl_ms),
                last_used: tick,
            },
        );
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.inner).entries.clear();
    }
}
