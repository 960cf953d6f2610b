// src/core/engine/delta.rs

//! The delta proxy engine.
//!
//! A time range request is answered from whatever part of its window is already
//! cached. Only the missing sub-extents are fetched upstream, merged into the
//! cached series and written back, so successive overlapping dashboards pay for
//! new data only.

use super::flight::FlightGroup;
use super::{RequestOptions, timed_fetch};
use crate::core::DeltaCacheError;
use crate::core::cache::{Cache, LookupStatus, ReferenceObject};
use crate::core::headers::format_result;
use crate::core::metrics::{FLIGHT_JOINS_TOTAL, LOOKUPS_TOTAL, WRITEBACK_FAILURES_TOTAL};
use crate::core::origin::{Origin, UpstreamSeries};
use crate::core::timeseries::extent::{from_nanos, step_nanos, to_nanos};
use crate::core::timeseries::{Extent, ExtentList, TimeRangeQuery, Timeseries};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const ENGINE_NAME: &str = "DeltaProxyCache";

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// What is stored under a query's cache key: the merged series and the extents
/// they are known to cover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTimeseries {
    pub extents: ExtentList,
    pub step: Duration,
    pub series: Timeseries,
}

impl ReferenceObject for CachedTimeseries {
    fn size(&self) -> usize {
        self.series.size() + self.extents.len() * std::mem::size_of::<Extent>()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Outcome of the fast-forward fetch for the current step bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastForwardStatus {
    /// Disabled, or the request does not reach the current bucket.
    Off,
    /// Fetched fresh from upstream.
    Miss,
    /// The fetch failed and the response was served without it.
    Error,
}

impl FastForwardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FastForwardStatus::Off => "off",
            FastForwardStatus::Miss => "miss",
            FastForwardStatus::Error => "err",
        }
    }
}

impl fmt::Display for FastForwardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The assembled answer to one time range request.
#[derive(Debug, Clone)]
pub struct DeltaResponse {
    pub series: Timeseries,
    pub status: LookupStatus,
    pub ff_status: FastForwardStatus,
    /// Sub-extents that were fetched upstream for this request.
    pub fetched: ExtentList,
    /// The normalized window the response covers.
    pub extent: Extent,
}

impl DeltaResponse {
    /// The diagnostic result header value for this response.
    pub fn result_header(&self) -> Option<String> {
        format_result(
            ENGINE_NAME,
            self.status.as_str(),
            self.ff_status.as_str(),
            &self.fetched,
        )
    }
}

pub struct DeltaProxyCache {
    cache: Arc<dyn Cache>,
    origin: Arc<dyn Origin>,
    flights: FlightGroup<UpstreamSeries>,
    clock: Clock,
}

impl DeltaProxyCache {
    pub fn new(cache: Arc<dyn Cache>, origin: Arc<dyn Origin>) -> Self {
        Self {
            cache,
            origin,
            flights: FlightGroup::new(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replaces the wall clock used for end clamping and fast forward.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn origin(&self) -> &Arc<dyn Origin> {
        &self.origin
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Fetches currently in flight for this engine.
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    /// Serves a time range request, fetching only what the cache lacks.
    pub async fn fetch(
        &self,
        query: &TimeRangeQuery,
        options: RequestOptions,
    ) -> Result<DeltaResponse, DeltaCacheError> {
        let origin_name = self.origin.name().to_string();
        let now = (self.clock)();

        let mut query = query.clone();
        query.normalize(now);
        let requested = query.extent;
        let step = query.step;
        let key = query.cache_key(&origin_name);

        let cached = if options.purge {
            debug!("Purging cached series for key '{}'", key);
            self.cache.remove(&key).await;
            None
        } else {
            self.lookup(&key).await?
        };

        let gaps = match &cached {
            Some(entry) => entry.extents.gaps(&requested),
            None => vec![requested],
        };
        let status = if options.purge {
            LookupStatus::Purge
        } else if cached.is_none() || gaps[..] == [requested] {
            LookupStatus::KeyMiss
        } else if gaps.is_empty() {
            LookupStatus::Hit
        } else {
            LookupStatus::RangeMiss
        };
        debug!(
            "Origin '{}' request {} resolved as {} with {} gap(s)",
            origin_name,
            requested,
            status,
            gaps.len()
        );
        LOOKUPS_TOTAL
            .with_label_values(&[ENGINE_NAME, origin_name.as_str(), status.as_str()])
            .inc();

        let ff_window = query.fast_forward_extent(now);
        let ff_wanted =
            !self.origin.config().fast_forward_disable && requested.end >= ff_window.start;

        let gap_fetches = gaps.iter().map(|gap| self.fetch_extent(&key, &query, *gap));
        let ff_fetch = async {
            if ff_wanted {
                Some(self.fetch_extent(&key, &query, ff_window).await)
            } else {
                None
            }
        };
        let (fetched, ff_result) = tokio::join!(try_join_all(gap_fetches), ff_fetch);
        let fetched = fetched?;

        let mut series = if gaps.is_empty() {
            cached
                .as_ref()
                .map(|entry| entry.series.cropped(&requested))
                .unwrap_or_default()
        } else {
            let mut merged = cached
                .as_ref()
                .map(|entry| entry.series.clone())
                .unwrap_or_default();
            for upstream in &fetched {
                merged.merge(&upstream.series);
            }

            // Gaps starting in the bucket that is still filling are served but never stored.
            let settled: Vec<Extent> = gaps
                .iter()
                .copied()
                .filter(|gap| gap.start < ff_window.start)
                .collect();
            if !fetched.iter().all(|upstream| upstream.cacheable) {
                debug!(
                    "Origin '{}' marked the response uncacheable; skipping writeback",
                    origin_name
                );
            } else if settled.is_empty() {
                debug!(
                    "Request {} lies in the open bucket; skipping writeback",
                    requested
                );
            } else {
                let extents = cached
                    .as_ref()
                    .map(|entry| entry.extents.merge(&settled, step))
                    .unwrap_or_else(|| ExtentList::from_extents(settled.iter().copied(), step));
                let object = self.retain(CachedTimeseries {
                    extents,
                    step,
                    series: merged.clone(),
                });
                self.writeback(&key, object).await;
            }
            merged.cropped(&requested)
        };

        let ff_status = match ff_result {
            None => FastForwardStatus::Off,
            Some(Ok(upstream)) => {
                series.merge(&upstream.series);
                FastForwardStatus::Miss
            }
            Some(Err(e)) => {
                warn!(
                    "Fast forward fetch for origin '{}' failed, serving without it: {}",
                    origin_name, e
                );
                FastForwardStatus::Error
            }
        };

        Ok(DeltaResponse {
            series,
            status,
            ff_status,
            fetched: ExtentList::from_extents(gaps.iter().copied(), Duration::ZERO),
            extent: requested,
        })
    }

    /// Reads the cached entry for `key`. Entries that cannot be read back as a
    /// cached series are treated as absent.
    async fn lookup(&self, key: &str) -> Result<Option<Arc<CachedTimeseries>>, DeltaCacheError> {
        let found = if self.cache.supports_references() {
            self.cache
                .retrieve_reference(key, false)
                .await
                .and_then(|(object, _)| {
                    object
                        .into_any()
                        .downcast::<CachedTimeseries>()
                        .map_err(|_| DeltaCacheError::ReferenceMismatch(key.to_string()))
                })
        } else {
            self.cache.retrieve(key, false).await.and_then(|(data, _)| {
                serde_json::from_slice::<CachedTimeseries>(&data)
                    .map(Arc::new)
                    .map_err(DeltaCacheError::from)
            })
        };

        match found {
            Ok(entry) => Ok(Some(entry)),
            Err(e) if e.lookup_status().is_some() => Ok(None),
            Err(e @ (DeltaCacheError::ReferenceMismatch(_) | DeltaCacheError::Serialization(_))) => {
                warn!("Ignoring unreadable cache entry '{}': {}", key, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetches `extent` of `query` upstream, sharing the call with concurrent
    /// requests for the same key and extent.
    async fn fetch_extent(
        &self,
        key: &str,
        query: &TimeRangeQuery,
        extent: Extent,
    ) -> Result<UpstreamSeries, DeltaCacheError> {
        let flight_key = format!("{key}:{}:{}", to_nanos(extent.start), to_nanos(extent.end));
        let origin = Arc::clone(&self.origin);
        let scoped = query.with_extent(extent);

        let (result, joined) = self
            .flights
            .run(flight_key, move || async move {
                let name = origin.name().to_string();
                let timeout = origin.config().timeout;
                timed_fetch(&name, timeout, origin.fetch_timeseries(&scoped)).await
            })
            .await;
        if joined {
            FLIGHT_JOINS_TOTAL
                .with_label_values(&[self.origin.name()])
                .inc();
        }

        let mut upstream = result?;
        upstream.series.crop(&extent);
        Ok(upstream)
    }

    /// Drops cached data older than the origin's retention window.
    fn retain(&self, mut object: CachedTimeseries) -> CachedTimeseries {
        let factor = self.origin.config().timeseries_retention_factor;
        let Some(outer) = object.extents.outer_extent() else {
            return object;
        };
        if factor == 0 {
            return object;
        }
        let span = step_nanos(object.step).saturating_mul(i64::try_from(factor).unwrap_or(i64::MAX));
        let window = Extent::new(
            from_nanos(to_nanos(outer.end).saturating_sub(span)),
            outer.end,
        );
        if window.start > outer.start {
            object.extents = object.extents.crop(&window);
            object.series.crop(&window);
        }
        object
    }

    /// Stores `object` under `key`. Failures are logged and counted, never returned.
    async fn writeback(&self, key: &str, object: CachedTimeseries) {
        let ttl = self.origin.config().timeseries_ttl;
        let result = if self.cache.supports_references() {
            self.cache.store_reference(key, Arc::new(object), ttl).await
        } else {
            match serde_json::to_vec(&object) {
                Ok(data) => self.cache.store(key, Bytes::from(data), ttl).await,
                Err(e) => Err(e.into()),
            }
        };
        if let Err(e) = result {
            warn!("Failed to write back cached series '{}': {}", key, e);
            WRITEBACK_FAILURES_TOTAL
                .with_label_values(&[self.origin.name()])
                .inc();
        }
    }
}
