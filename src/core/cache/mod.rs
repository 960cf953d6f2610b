// src/core/cache/mod.rs

//! The cache store contract and its backends.
//!
//! Engines talk to a cache only through [`Cache`]. A backend keeps payloads in a
//! single map of tagged [`CacheEntry`] values, so byte payloads and in-process
//! reference objects share one index and one eviction policy.

pub mod index;
pub mod memory;
pub mod status;

pub use index::{CacheIndex, IndexEntry, IndexLookup, IndexObjects};
pub use memory::MemoryCache;
pub use status::LookupStatus;

use crate::config::{CacheType, CachingConfig};
use crate::core::DeltaCacheError;
use async_trait::async_trait;
use bytes::Bytes;
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An object stored in the cache without serialization.
///
/// The reported size is what the index accounts for when enforcing size limits.
pub trait ReferenceObject: Any + Send + Sync {
    fn size(&self) -> usize;

    /// Upcasts for downcasting back to the concrete type on retrieval.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A single cached payload.
#[derive(Clone)]
pub enum CacheEntry {
    Bytes(Bytes),
    Reference(Arc<dyn ReferenceObject>),
}

impl CacheEntry {
    /// The size charged to the index for this entry.
    pub fn size(&self) -> usize {
        match self {
            CacheEntry::Bytes(data) => data.len(),
            CacheEntry::Reference(object) => object.size(),
        }
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheEntry::Bytes(data) => f.debug_tuple("Bytes").field(&data.len()).finish(),
            CacheEntry::Reference(object) => {
                f.debug_tuple("Reference").field(&object.size()).finish()
            }
        }
    }
}

/// The uniform contract every cache backend implements.
///
/// Successful lookups report `LookupStatus::Hit`. A missing or expired key is
/// reported as `DeltaCacheError::KeyMiss`, whose `lookup_status()` is `KeyMiss`.
/// Backends never retry.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Prepares storage and starts the periodic reaper. Calling it twice is harmless.
    async fn connect(&self) -> Result<(), DeltaCacheError>;

    async fn store(&self, key: &str, data: Bytes, ttl: Duration) -> Result<(), DeltaCacheError>;

    async fn store_reference(
        &self,
        key: &str,
        object: Arc<dyn ReferenceObject>,
        ttl: Duration,
    ) -> Result<(), DeltaCacheError>;

    async fn retrieve(
        &self,
        key: &str,
        allow_expired: bool,
    ) -> Result<(Bytes, LookupStatus), DeltaCacheError>;

    /// Fails with `ReferenceMismatch` if the key holds bytes.
    async fn retrieve_reference(
        &self,
        key: &str,
        allow_expired: bool,
    ) -> Result<(Arc<dyn ReferenceObject>, LookupStatus), DeltaCacheError>;

    /// Updates the expiration of an existing key; absent keys are ignored.
    async fn set_ttl(&self, key: &str, ttl: Duration);

    async fn remove(&self, key: &str);

    /// Removes a batch of keys. With `no_lock` the index lock is taken once for
    /// the whole batch instead of once per key.
    async fn bulk_remove(&self, keys: &[String], no_lock: bool);

    /// Stops background work and releases storage. Safe to call more than once.
    async fn close(&self) -> Result<(), DeltaCacheError>;

    fn configuration(&self) -> &CachingConfig;

    /// The recorded expiration for `key`, or `None` when it was never stored.
    fn get_expiration(&self, key: &str) -> Option<Instant>;

    /// Whether `store_reference` keeps objects in-process.
    fn supports_references(&self) -> bool {
        false
    }
}

/// Builds the backend named by `config.cache_type`.
pub fn new_cache(config: CachingConfig) -> Arc<dyn Cache> {
    match config.cache_type {
        CacheType::Memory => Arc::new(MemoryCache::new(config)),
    }
}
