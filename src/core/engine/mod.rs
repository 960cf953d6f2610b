// src/core/engine/mod.rs

//! Request engines that sit between inbound requests, a cache and an origin.

pub mod delta;
pub mod flight;
pub mod object;

pub use delta::{CachedTimeseries, DeltaProxyCache, DeltaResponse, FastForwardStatus};
pub use flight::FlightGroup;
pub use object::{ObjectProxyCache, ObjectResponse};

use crate::core::DeltaCacheError;
use crate::core::metrics::{UPSTREAM_FETCHES_TOTAL, UPSTREAM_LATENCY_SECONDS};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::warn;

/// Per-request switches taken from the inbound request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Drop the cached entry before serving, as with `Cache-Control: no-cache`.
    pub purge: bool,
}

/// Runs one upstream call under `timeout`, recording its latency and outcome.
pub(crate) async fn timed_fetch<T, F>(
    origin: &str,
    timeout: Duration,
    fetch: F,
) -> Result<T, DeltaCacheError>
where
    F: Future<Output = Result<T, DeltaCacheError>>,
{
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, fetch).await;
    UPSTREAM_LATENCY_SECONDS
        .with_label_values(&[origin])
        .observe(started.elapsed().as_secs_f64());

    let (label, result) = match outcome {
        Ok(Ok(value)) => ("ok", Ok(value)),
        Ok(Err(e)) => {
            warn!("Upstream fetch from origin '{}' failed: {}", origin, e);
            ("error", Err(e))
        }
        Err(_) => {
            warn!("Upstream fetch from origin '{}' timed out after {:?}", origin, timeout);
            ("timeout", Err(DeltaCacheError::UpstreamTimeout(timeout)))
        }
    };
    UPSTREAM_FETCHES_TOTAL
        .with_label_values(&[origin, label])
        .inc();
    result
}
