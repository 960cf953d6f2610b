// src/core/cache/index.rs

//! The cache index: per-key expiration, byte size, and last access time.
//!
//! The index decides whether a key is logically present. Payloads live in the
//! backend's own map; the index only holds cheap metadata so sweeps never touch
//! payload storage. All bookkeeping sits behind a single mutex. Compound
//! operations (store, remove, sweep) take the guard once via [`CacheIndex::lock`]
//! and work on [`IndexObjects`] directly.

use crate::config::CacheIndexConfig;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// TTLs are capped so deadline arithmetic on `Instant` cannot overflow.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Computes `now + ttl`, saturating at the TTL cap.
pub fn deadline(now: Instant, ttl: Duration) -> Instant {
    now + ttl.min(MAX_TTL)
}

/// Bookkeeping for one stored key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub expiration: Instant,
    pub last_access: Instant,
    pub size: u64,
}

impl IndexEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expiration <= now
    }
}

/// Result of checking a key against the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexLookup {
    Live,
    /// The entry had expired. Unless expired reads were allowed, it has been dropped.
    Expired,
    Absent,
}

/// The mapping guarded by the index lock.
#[derive(Debug, Default)]
pub struct IndexObjects {
    entries: HashMap<String, IndexEntry>,
    total_size: u64,
}

impl IndexObjects {
    /// Creates or replaces the entry for `key`.
    pub fn upsert(&mut self, key: &str, size: u64, ttl: Duration, now: Instant) {
        let entry = IndexEntry {
            expiration: deadline(now, ttl),
            last_access: now,
            size,
        };
        if let Some(previous) = self.entries.insert(key.to_string(), entry) {
            self.total_size -= previous.size;
        }
        self.total_size += size;
    }

    pub fn remove(&mut self, key: &str) -> Option<IndexEntry> {
        let removed = self.entries.remove(key);
        if let Some(entry) = &removed {
            self.total_size -= entry.size;
        }
        removed
    }

    /// Checks `key`, refreshing its last access time when it is served.
    /// An expired entry is purged here unless `allow_expired` is set.
    pub fn lookup(&mut self, key: &str, allow_expired: bool, now: Instant) -> IndexLookup {
        let Some(entry) = self.entries.get_mut(key) else {
            return IndexLookup::Absent;
        };
        if !entry.is_expired(now) {
            entry.last_access = now;
            return IndexLookup::Live;
        }
        if allow_expired {
            entry.last_access = now;
        } else {
            self.remove(key);
        }
        IndexLookup::Expired
    }

    /// Moves the expiration of an existing key. Returns false if the key is absent.
    pub fn set_ttl(&mut self, key: &str, ttl: Duration, now: Instant) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.expiration = deadline(now, ttl);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&IndexEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn expired_keys(&self, now: Instant) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Picks the least recently accessed keys whose removal brings the index
    /// back under its size limits (limit minus backoff).
    pub fn eviction_candidates(&self, config: &CacheIndexConfig) -> Vec<String> {
        let over_bytes =
            config.max_size_bytes > 0 && self.total_size > config.max_size_bytes;
        let over_objects =
            config.max_size_objects > 0 && self.entries.len() as u64 > config.max_size_objects;
        if !over_bytes && !over_objects {
            return Vec::new();
        }

        let target_bytes = config
            .max_size_bytes
            .saturating_sub(config.max_size_backoff_bytes);
        let target_objects = config
            .max_size_objects
            .saturating_sub(config.max_size_backoff_objects);

        let mut by_access: Vec<(&String, &IndexEntry)> = self.entries.iter().collect();
        by_access.sort_by_key(|(_, entry)| entry.last_access);

        let mut bytes = self.total_size;
        let mut objects = self.entries.len() as u64;
        let mut victims = Vec::new();
        for (key, entry) in by_access {
            let bytes_ok = !over_bytes || bytes <= target_bytes;
            let objects_ok = !over_objects || objects <= target_objects;
            if bytes_ok && objects_ok {
                break;
            }
            bytes -= entry.size;
            objects -= 1;
            victims.push(key.clone());
        }
        victims
    }
}

/// The lock-guarded index shared by a cache backend and its reaper.
#[derive(Debug)]
pub struct CacheIndex {
    config: CacheIndexConfig,
    objects: Mutex<IndexObjects>,
}

impl CacheIndex {
    pub fn new(config: CacheIndexConfig) -> Self {
        Self {
            config,
            objects: Mutex::new(IndexObjects::default()),
        }
    }

    pub fn config(&self) -> &CacheIndexConfig {
        &self.config
    }

    /// Acquires the index lock for a compound operation.
    pub fn lock(&self) -> MutexGuard<'_, IndexObjects> {
        self.objects.lock()
    }

    /// Returns the recorded expiration for `key`, or `None` if it was never stored.
    pub fn get_expiration(&self, key: &str) -> Option<Instant> {
        self.objects.lock().get(key).map(|entry| entry.expiration)
    }

    pub fn set_ttl(&self, key: &str, ttl: Duration) -> bool {
        self.objects.lock().set_ttl(key, ttl, Instant::now())
    }

    /// Collects expired keys under a short lock hold.
    pub fn expired_keys(&self, now: Instant) -> Vec<String> {
        self.objects.lock().expired_keys(now)
    }

    pub fn eviction_candidates(&self) -> Vec<String> {
        self.objects.lock().eviction_candidates(&self.config)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn total_size(&self) -> u64 {
        self.objects.lock().total_size()
    }
}
