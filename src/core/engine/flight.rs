// src/core/engine/flight.rs

//! Duplicate upstream fetch suppression.
//!
//! Concurrent callers asking for the same flight key share one upstream fetch.
//! The first caller (the leader) creates the fetch future and publishes it in
//! the table. Later callers (followers) attach to it. The fetch is only polled
//! by its waiters, so it is cancelled once every waiter has gone away. A waiter
//! that finishes or is dropped releases the table entry, which lets a later
//! caller start a fresh fetch while earlier followers keep driving the old one.

use crate::core::DeltaCacheError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, Arc<DeltaCacheError>>>>;

/// A keyed table of in-flight fetches.
pub struct FlightGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    calls: DashMap<String, (u64, SharedFetch<T>)>,
    next_id: AtomicU64,
}

/// Removes the table entry it was created for, unless a newer flight replaced it.
struct FlightGuard<'a, T>
where
    T: Clone + Send + Sync + 'static,
{
    calls: &'a DashMap<String, (u64, SharedFetch<T>)>,
    key: String,
    id: u64,
}

impl<T> Drop for FlightGuard<'_, T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.calls.remove_if(&self.key, |_, (id, _)| *id == self.id);
    }
}

impl<T> Default for FlightGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FlightGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of fetches currently published in the table.
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }

    /// Runs the fetch built by `make` under `key`, or joins the one already in
    /// flight. Returns the result and whether this caller joined an existing fetch.
    pub async fn run<F, Fut>(&self, key: String, make: F) -> (Result<T, DeltaCacheError>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DeltaCacheError>> + Send + 'static,
    {
        let (id, fetch, joined) = match self.calls.entry(key.clone()) {
            // Follower path: a fetch for this key is already running.
            Entry::Occupied(occupied) => {
                let (id, fetch) = occupied.get();
                (*id, fetch.clone(), true)
            }
            // Leader path: publish a new shared fetch.
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let fetch: BoxFuture<'static, Result<T, Arc<DeltaCacheError>>> =
                    make().map(|result| result.map_err(Arc::new)).boxed();
                let shared = fetch.shared();
                vacant.insert((id, shared.clone()));
                (id, shared, false)
            }
        };

        let _guard = FlightGuard {
            calls: &self.calls,
            key,
            id,
        };
        let result = fetch.await.map_err(DeltaCacheError::from);
        (result, joined)
    }
}
