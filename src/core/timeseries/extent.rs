// src/core/timeseries/extent.rs

//! Closed time intervals and the canonical, merged lists of them kept per cache key.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Converts a timestamp to nanoseconds since the Unix epoch, saturating outside
/// the representable range (years 1677 to 2262).
pub fn to_nanos(t: DateTime<Utc>) -> i64 {
    t.timestamp_nanos_opt()
        .unwrap_or(if t.timestamp() < 0 { i64::MIN } else { i64::MAX })
}

pub fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

/// A step as a signed nanosecond count, never less than one.
pub fn step_nanos(step: Duration) -> i64 {
    i64::try_from(step.as_nanos()).unwrap_or(i64::MAX).max(1)
}

fn step_delta(step: Duration) -> TimeDelta {
    TimeDelta::from_std(step).unwrap_or(TimeDelta::MAX)
}

/// A closed interval `[start, end]`. The default value (both ends at the epoch) is
/// the zero extent, meaning "no extent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Extent {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Builds an extent from whole Unix seconds.
    pub fn from_unix(start: i64, end: i64) -> Self {
        Self {
            start: DateTime::from_timestamp(start, 0).unwrap_or_default(),
            end: DateTime::from_timestamp(end, 0).unwrap_or_default(),
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Extent::default()
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }

    /// True when `other` lies entirely inside this extent.
    pub fn encloses(&self, other: &Extent) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// The overlap of two extents, if any.
    pub fn intersect(&self, other: &Extent) -> Option<Extent> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some(Extent { start, end })
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.start.timestamp(), self.end.timestamp())
    }
}

/// A sorted list of non-overlapping extents, merged into maximal runs.
///
/// Every constructor normalizes its input, so the invariant holds for any value
/// of this type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentList(Vec<Extent>);

impl ExtentList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Normalizes arbitrary extents: zero extents are dropped, the rest are sorted
    /// and runs that overlap or sit within one `step` of each other are merged.
    pub fn from_extents(extents: impl IntoIterator<Item = Extent>, step: Duration) -> Self {
        let mut extents: Vec<Extent> = extents.into_iter().filter(|e| !e.is_zero()).collect();
        extents.sort_by_key(|e| (e.start, e.end));

        let step = step_delta(step);
        let mut merged: Vec<Extent> = Vec::with_capacity(extents.len());
        for extent in extents {
            if let Some(last) = merged.last_mut() {
                let reach = last.end.checked_add_signed(step).unwrap_or(last.end);
                if extent.start <= reach {
                    last.end = last.end.max(extent.end);
                    continue;
                }
            }
            merged.push(extent);
        }
        Self(merged)
    }

    /// Returns a new list containing this one plus `extents`, normalized.
    pub fn merge(&self, extents: &[Extent], step: Duration) -> Self {
        Self::from_extents(self.0.iter().chain(extents).copied(), step)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Extent> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Extent] {
        &self.0
    }

    /// The smallest extent spanning the whole list.
    pub fn outer_extent(&self) -> Option<Extent> {
        let first = self.0.first()?;
        let last = self.0.last()?;
        Some(Extent::new(first.start, last.end))
    }

    /// Keeps only the parts of the list that fall inside `window`.
    pub fn crop(&self, window: &Extent) -> Self {
        Self(self.0.iter().filter_map(|e| e.intersect(window)).collect())
    }

    /// True when `extent` is entirely covered by a single run of the list.
    pub fn encloses(&self, extent: &Extent) -> bool {
        self.0.iter().any(|e| e.encloses(extent))
    }

    /// Computes the parts of `requested` not covered by this list.
    ///
    /// Gaps are closed intervals that share their boundary instants with the
    /// neighbouring cached runs, so a boundary sample is fetched again and the
    /// fresh value wins on merge. Inputs aligned to the step give aligned gaps.
    pub fn gaps(&self, requested: &Extent) -> Vec<Extent> {
        if requested.is_zero() || requested.start > requested.end {
            return Vec::new();
        }
        if requested.start == requested.end {
            return if self.covers_instant(requested.start) {
                Vec::new()
            } else {
                vec![*requested]
            };
        }
        let mut gaps = Vec::new();
        let mut cursor = requested.start;
        for cached in &self.0 {
            if cached.end < cursor {
                continue;
            }
            if cached.start > requested.end {
                break;
            }
            if cached.start > cursor {
                gaps.push(Extent::new(cursor, cached.start));
            }
            cursor = cursor.max(cached.end);
            if cursor >= requested.end {
                return gaps;
            }
        }
        if cursor < requested.end {
            gaps.push(Extent::new(cursor, requested.end));
        }
        gaps
    }

    fn covers_instant(&self, t: DateTime<Utc>) -> bool {
        self.0.iter().any(|e| e.contains(t))
    }
}

impl fmt::Display for ExtentList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "[{}]", parts.join(","))
    }
}

impl<'a> IntoIterator for &'a ExtentList {
    type Item = &'a Extent;
    type IntoIter = std::slice::Iter<'a, Extent>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
