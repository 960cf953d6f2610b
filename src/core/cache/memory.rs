// src/core/cache/memory.rs

//! The in-process memory cache backend.

use super::index::{CacheIndex, IndexLookup};
use super::{Cache, CacheEntry, LookupStatus, ReferenceObject};
use crate::config::CachingConfig;
use crate::core::DeltaCacheError;
use crate::core::metrics;
use crate::core::tasks::reaper::{IndexReaper, Sweep, SweepReport};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Payload map plus index. Shared between the cache handle and its reaper task.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    index: CacheIndex,
    payloads: DashMap<String, CacheEntry>,
}

impl MemoryStore {
    fn new(config: &CachingConfig) -> Self {
        Self {
            name: config.name.clone(),
            index: CacheIndex::new(config.index.clone()),
            payloads: DashMap::new(),
        }
    }

    fn put(&self, key: &str, entry: CacheEntry, ttl: Duration) {
        let size = entry.size() as u64;
        let mut objects = self.index.lock();
        self.payloads.insert(key.to_string(), entry);
        objects.upsert(key, size, ttl, Instant::now());
        self.publish_usage(objects.len(), objects.total_size());
    }

    fn get(&self, key: &str, allow_expired: bool) -> Result<CacheEntry, DeltaCacheError> {
        let mut objects = self.index.lock();
        match objects.lookup(key, allow_expired, Instant::now()) {
            IndexLookup::Live => {}
            IndexLookup::Expired if allow_expired => {}
            IndexLookup::Expired => {
                debug!("Lazily expiring key '{}' from cache '{}'", key, self.name);
                self.payloads.remove(key);
                self.publish_usage(objects.len(), objects.total_size());
                return Err(DeltaCacheError::KeyMiss(key.to_string()));
            }
            IndexLookup::Absent => return Err(DeltaCacheError::KeyMiss(key.to_string())),
        }
        self.payloads
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DeltaCacheError::KeyMiss(key.to_string()))
    }

    /// Removes each key for which `predicate` holds on its index entry, taking the
    /// index lock once for the whole batch.
    fn remove_batch_if<F>(&self, keys: &[String], predicate: F) -> usize
    where
        F: Fn(&super::IndexEntry) -> bool,
    {
        let mut objects = self.index.lock();
        let mut removed = 0;
        for key in keys {
            if objects.get(key).is_some_and(&predicate) {
                objects.remove(key);
                self.payloads.remove(key);
                removed += 1;
            }
        }
        self.publish_usage(objects.len(), objects.total_size());
        removed
    }

    fn remove_one(&self, key: &str) {
        let mut objects = self.index.lock();
        objects.remove(key);
        self.payloads.remove(key);
        self.publish_usage(objects.len(), objects.total_size());
    }

    fn clear(&self) {
        let mut objects = self.index.lock();
        let keys: Vec<String> = self.payloads.iter().map(|e| e.key().clone()).collect();
        for key in &keys {
            objects.remove(key);
        }
        self.payloads.clear();
        self.publish_usage(objects.len(), objects.total_size());
    }

    fn publish_usage(&self, objects: usize, bytes: u64) {
        metrics::CACHE_OBJECTS
            .with_label_values(&[self.name.as_str()])
            .set(objects as f64);
        metrics::CACHE_BYTES
            .with_label_values(&[self.name.as_str()])
            .set(bytes as f64);
    }
}

impl Sweep for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let expired = self.index.expired_keys(now);
        // Entries refreshed since collection are kept.
        let expired = if expired.is_empty() {
            0
        } else {
            self.remove_batch_if(&expired, |entry| entry.is_expired(now))
        };

        let candidates = self.index.eviction_candidates();
        let evicted = if candidates.is_empty() {
            0
        } else {
            self.remove_batch_if(&candidates, |_| true)
        };

        SweepReport { expired, evicted }
    }
}

/// Handle to a running reaper task.
struct ReaperHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// A memory-backed cache with a lazily- and periodically-expiring index.
pub struct MemoryCache {
    config: CachingConfig,
    inner: Arc<MemoryStore>,
    reaper: Mutex<Option<ReaperHandle>>,
}

impl MemoryCache {
    pub fn new(config: CachingConfig) -> Self {
        let inner = Arc::new(MemoryStore::new(&config));
        Self {
            config,
            inner,
            reaper: Mutex::new(None),
        }
    }

    /// Number of keys currently tracked by the index.
    pub fn object_count(&self) -> usize {
        self.inner.index.object_count()
    }

    /// Total bytes currently charged to the index.
    pub fn total_size(&self) -> u64 {
        self.inner.index.total_size()
    }

    /// Runs one reaper pass immediately.
    pub fn sweep_now(&self) -> SweepReport {
        self.inner.sweep()
    }

    /// True while a periodic reaper task is running.
    pub fn reaper_running(&self) -> bool {
        self.reaper.lock().is_some()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn connect(&self) -> Result<(), DeltaCacheError> {
        let interval = self.config.index.reap_interval;
        let mut reaper = self.reaper.lock();
        if reaper.is_some() {
            return Ok(());
        }
        info!(
            "Connecting memory cache '{}' (reap interval {:?})",
            self.config.name, interval
        );
        if interval.is_zero() {
            debug!(
                "Periodic reaping disabled for cache '{}'; only lazy expiration applies.",
                self.config.name
            );
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = IndexReaper::new(self.inner.clone(), interval);
        let task = tokio::spawn(task.run(shutdown_rx));
        *reaper = Some(ReaperHandle { shutdown_tx, task });
        Ok(())
    }

    async fn store(&self, key: &str, data: Bytes, ttl: Duration) -> Result<(), DeltaCacheError> {
        debug!("memorycache cache store key={} ttl={:?}", key, ttl);
        self.inner.put(key, CacheEntry::Bytes(data), ttl);
        Ok(())
    }

    async fn store_reference(
        &self,
        key: &str,
        object: Arc<dyn ReferenceObject>,
        ttl: Duration,
    ) -> Result<(), DeltaCacheError> {
        debug!("memorycache cache store reference key={} ttl={:?}", key, ttl);
        self.inner.put(key, CacheEntry::Reference(object), ttl);
        Ok(())
    }

    async fn retrieve(
        &self,
        key: &str,
        allow_expired: bool,
    ) -> Result<(Bytes, LookupStatus), DeltaCacheError> {
        match self.inner.get(key, allow_expired)? {
            CacheEntry::Bytes(data) => {
                debug!("memorycache cache retrieve key={}", key);
                Ok((data, LookupStatus::Hit))
            }
            CacheEntry::Reference(_) => Err(DeltaCacheError::Store(format!(
                "value for key [{key}] is a reference object"
            ))),
        }
    }

    async fn retrieve_reference(
        &self,
        key: &str,
        allow_expired: bool,
    ) -> Result<(Arc<dyn ReferenceObject>, LookupStatus), DeltaCacheError> {
        match self.inner.get(key, allow_expired)? {
            CacheEntry::Reference(object) => {
                debug!("memorycache cache retrieve reference key={}", key);
                Ok((object, LookupStatus::Hit))
            }
            CacheEntry::Bytes(_) => Err(DeltaCacheError::ReferenceMismatch(key.to_string())),
        }
    }

    async fn set_ttl(&self, key: &str, ttl: Duration) {
        if !self.inner.index.set_ttl(key, ttl) {
            debug!("set_ttl ignored for absent key '{}'", key);
        }
    }

    async fn remove(&self, key: &str) {
        debug!("memorycache cache remove key={}", key);
        self.inner.remove_one(key);
    }

    async fn bulk_remove(&self, keys: &[String], no_lock: bool) {
        debug!("memorycache cache bulk remove count={}", keys.len());
        if no_lock {
            self.inner.remove_batch_if(keys, |_| true);
        } else {
            for key in keys {
                self.inner.remove_one(key);
            }
        }
    }

    async fn close(&self) -> Result<(), DeltaCacheError> {
        let handle = self.reaper.lock().take();
        if let Some(handle) = handle {
            // A send error only means the task already stopped.
            let _ = handle.shutdown_tx.send(());
            if let Err(e) = handle.task.await {
                warn!("Reaper task for cache '{}' ended abnormally: {}", self.config.name, e);
            }
        }
        self.inner.clear();
        Ok(())
    }

    fn configuration(&self) -> &CachingConfig {
        &self.config
    }

    fn get_expiration(&self, key: &str) -> Option<Instant> {
        self.inner.index.get_expiration(key)
    }

    fn supports_references(&self) -> bool {
        true
    }
}
