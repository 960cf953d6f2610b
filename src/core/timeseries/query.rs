// src/core/timeseries/query.rs

//! The normalized time range query and its step-alignment arithmetic.

use super::extent::{Extent, from_nanos, step_nanos, to_nanos};
use crate::core::DeltaCacheError;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

/// Snaps a timestamp down to the nearest multiple of `step` from the epoch.
pub fn align_timestamp(t: DateTime<Utc>, step: Duration) -> DateTime<Utc> {
    let nanos = to_nanos(t);
    from_nanos(nanos - nanos.rem_euclid(step_nanos(step)))
}

/// Aligns both ends of `extent` to `step`. A window that collapses to a single
/// instant is widened by one step so it is never empty.
pub fn align_extent(extent: &Extent, step: Duration) -> Extent {
    let start = to_nanos(align_timestamp(extent.start, step));
    let mut end = to_nanos(align_timestamp(extent.end, step));
    if start == end {
        end = end.saturating_add(step_nanos(step));
    }
    Extent::new(from_nanos(start), from_nanos(end))
}

/// The most recent step bucket as of `now`: `[now - now % step, that + step]`.
pub fn fast_forward_window(now: DateTime<Utc>, step: Duration) -> Extent {
    let start = to_nanos(align_timestamp(now, step));
    Extent::new(from_nanos(start), from_nanos(start.saturating_add(step_nanos(step))))
}

/// Parses a timestamp given as Unix seconds (integer or fractional) or RFC 3339.
pub fn parse_timestamp(param: &str, value: &str) -> Result<DateTime<Utc>, DeltaCacheError> {
    let invalid = || DeltaCacheError::InvalidTimestamp {
        param: param.to_string(),
        value: value.to_string(),
    };
    if let Ok(secs) = value.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0).ok_or_else(invalid);
    }
    if let Ok(secs) = value.parse::<f64>() {
        if !secs.is_finite() || secs.abs() > (i64::MAX / 1_000_000_000) as f64 {
            return Err(invalid());
        }
        return Ok(from_nanos((secs * 1e9).round() as i64));
    }
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| invalid())
}

/// Parses a non-zero duration such as `60s`, `5m` or `1h 30m`.
pub fn parse_step(param: &str, value: &str) -> Result<Duration, DeltaCacheError> {
    match humantime_serde::re::humantime::parse_duration(value) {
        Ok(step) if !step.is_zero() => Ok(step),
        _ => Err(DeltaCacheError::InvalidDuration {
            param: param.to_string(),
            value: value.to_string(),
        }),
    }
}

/// A time-series request reduced to what caching needs: the query text, the
/// requested window and the sampling interval.
///
/// `params` holds any other inbound parameters. They are sent upstream and
/// distinguish cache entries. `headers` and `remote_addr` describe the client
/// and are only forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRangeQuery {
    pub statement: String,
    pub extent: Extent,
    pub step: Duration,
    pub params: BTreeMap<String, String>,
    pub headers: HeaderMap,
    pub remote_addr: String,
}

impl TimeRangeQuery {
    pub fn new(statement: impl Into<String>, extent: Extent, step: Duration) -> Self {
        Self {
            statement: statement.into(),
            extent,
            step,
            params: BTreeMap::new(),
            headers: HeaderMap::new(),
            remote_addr: String::new(),
        }
    }

    pub fn with_params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Attaches the client's request headers and address.
    pub fn with_client(mut self, headers: HeaderMap, remote_addr: impl Into<String>) -> Self {
        self.headers = headers;
        self.remote_addr = remote_addr.into();
        self
    }

    /// The requested extent aligned to this query's step.
    pub fn aligned_extent(&self) -> Extent {
        align_extent(&self.extent, self.step)
    }

    /// Clamps the window to `now` and aligns it to the step.
    ///
    /// The end never passes the start of the bucket `now` falls in. A window
    /// lying inside that bucket collapses to the instant the bucket starts.
    pub fn normalize(&mut self, now: DateTime<Utc>) {
        if self.extent.end > now {
            self.extent.end = now;
        }
        if self.extent.start > self.extent.end {
            self.extent.start = self.extent.end;
        }
        let open = align_timestamp(now, self.step);
        let mut aligned = self.aligned_extent();
        if aligned.end > open {
            aligned.end = open;
            aligned.start = aligned.start.min(open);
        }
        self.extent = aligned;
    }

    /// The cache key for this statement, step and extra parameters. The extent
    /// is deliberately not part of the key, so successive windows accumulate
    /// under one entry.
    pub fn cache_key(&self, namespace: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(namespace.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.statement.as_bytes());
        hasher.update([0u8]);
        hasher.update(step_nanos(self.step).to_be_bytes());
        for (name, value) in &self.params {
            hasher.update([0u8]);
            hasher.update(name.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn fast_forward_extent(&self, now: DateTime<Utc>) -> Extent {
        fast_forward_window(now, self.step)
    }

    /// A copy of this query scoped to `extent`.
    pub fn with_extent(&self, extent: Extent) -> Self {
        Self {
            extent,
            ..self.clone()
        }
    }
}
