//! The response cache proper: TTL-tiered entries with popularity extension
//! and least-recently-accessed eviction.

use super::key::ResponseKey;
use super::policy::{CachePolicy, SkipReason, TtlTier};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Entries whose access count passes this get the long tier on next read.
const POPULAR_THRESHOLD: u32 = 5;

#[derive(Debug, Clone)]
struct Entry {
    payload: String,
    created_at: Instant,
    expires_at: Instant,
    access_count: u32,
    last_accessed: Instant,
}

/// A cache hit, with access bookkeeping already applied.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub payload: String,
    pub access_count: u32,
    pub age: Duration,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ResponseCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub skips: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Key-normalized, TTL-tiered cache in front of the generation step.
pub struct ResponseCache {
    entries: Mutex<HashMap<String, Entry>>,
    policy: CachePolicy,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    skips: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            policy: CachePolicy::new(),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stores: AtomicU64::new(0),
            skips: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a previously generated answer. Updates access bookkeeping and
    /// extends popular entries to the long tier.
    pub fn get(&self, key: &ResponseKey) -> Option<CachedResponse> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let now = Instant::now();
        match entries.get_mut(key.as_str()) {
            Some(entry) if entry.expires_at > now => {
                entry.access_count += 1;
                entry.last_accessed = now;
                if entry.access_count > POPULAR_THRESHOLD {
                    let long = entry.created_at + TtlTier::Long.duration();
                    if long > entry.expires_at {
                        entry.expires_at = long;
                    }
                }
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(CachedResponse {
                    payload: entry.payload.clone(),
                    access_count: entry.access_count,
                    age: now.duration_since(entry.created_at),
                })
            }
            Some(_) => {
                entries.remove(key.as_str());
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a generated answer unless the policy refuses it. Returns the
    /// skip reason when nothing was stored.
    pub fn set(&self, key: &ResponseKey, query: &str, payload: &str) -> Result<TtlTier, SkipReason> {
        if let Err(reason) = self.policy.check(query, payload) {
            self.skips.fetch_add(1, Ordering::Relaxed);
            debug!(?reason, "cache write skipped");
            return Err(reason);
        }

        let tier = self.policy.classify(query);
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.insert(
            key.as_str().to_string(),
            Entry {
                payload: payload.to_string(),
                created_at: now,
                expires_at: now + tier.duration(),
                access_count: 0,
                last_accessed: now,
            },
        );
        self.stores.fetch_add(1, Ordering::Relaxed);
        self.evict_locked(&mut entries, now);
        Ok(tier)
    }

    /// Sweep expired entries, then drop least-recently-accessed ones until
    /// back under capacity.
    fn evict_locked(&self, entries: &mut HashMap<String, Entry>, now: Instant) {
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        while entries.len() > self.capacity {
            let coldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone());
            match coldest {
                Some(k) => {
                    entries.remove(&k);
                }
                None => break,
            }
        }
        let removed = before.saturating_sub(entries.len());
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> ResponseCacheStats {
        let entries = self.entries.lock().expect("cache lock poisoned");
        ResponseCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: entries.len(),
        }
    }

    /// Test hook: age one entry so it reads as expired.
    #[cfg(test)]
    fn force_expire(&self, key: &ResponseKey) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(e) = entries.get_mut(key.as_str()) {
            e.expires_at = Instant::now() - Duration::from_secs(1);
        }
    }
}
