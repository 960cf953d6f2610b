// src/core/timeseries/series.rs

//! The in-memory series model and its time-ordered merge.

use super::extent::Extent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Approximate per-point footprint, used for cache size accounting.
const POINT_SIZE: usize = std::mem::size_of::<Point>();

/// A single sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Point {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// One labelled series of samples, kept sorted by timestamp without duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub points: Vec<Point>,
}

impl Series {
    pub fn new(name: impl Into<String>, tags: BTreeMap<String, String>, points: Vec<Point>) -> Self {
        let mut series = Self {
            name: name.into(),
            tags,
            points,
        };
        series.normalize();
        series
    }

    /// Sorts points by time and drops duplicate timestamps, keeping the last one seen.
    pub fn normalize(&mut self) {
        self.points.sort_by_key(|p| p.timestamp);
        let mut deduped: Vec<Point> = Vec::with_capacity(self.points.len());
        for point in self.points.drain(..) {
            match deduped.last_mut() {
                Some(last) if last.timestamp == point.timestamp => *last = point,
                _ => deduped.push(point),
            }
        }
        self.points = deduped;
    }

    fn same_identity(&self, other: &Series) -> bool {
        self.name == other.name && self.tags == other.tags
    }

    /// Merges `fresh` into this series. On equal timestamps the fresh sample wins.
    /// Both inputs must already be normalized.
    pub fn merge_points(&mut self, fresh: &[Point]) {
        let cached = std::mem::take(&mut self.points);
        let mut merged = Vec::with_capacity(cached.len() + fresh.len());
        let (mut i, mut j) = (0, 0);
        while i < cached.len() && j < fresh.len() {
            match cached[i].timestamp.cmp(&fresh[j].timestamp) {
                Ordering::Less => {
                    merged.push(cached[i]);
                    i += 1;
                }
                Ordering::Greater => {
                    merged.push(fresh[j]);
                    j += 1;
                }
                Ordering::Equal => {
                    merged.push(fresh[j]);
                    i += 1;
                    j += 1;
                }
            }
        }
        merged.extend_from_slice(&cached[i..]);
        merged.extend_from_slice(&fresh[j..]);
        self.points = merged;
    }

    pub fn crop(&mut self, extent: &Extent) {
        self.points.retain(|p| extent.contains(p.timestamp));
    }

    fn size(&self) -> usize {
        self.name.len()
            + self.tags.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>()
            + self.points.len() * POINT_SIZE
    }
}

/// A set of series returned for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeseries {
    pub series: Vec<Series>,
}

impl Timeseries {
    pub fn new(series: Vec<Series>) -> Self {
        Self { series }
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn point_count(&self) -> usize {
        self.series.iter().map(|s| s.points.len()).sum()
    }

    /// Merges `fresh` into this set, matching series by name and tags. Series not
    /// present yet are appended in the order they arrive.
    pub fn merge(&mut self, fresh: &Timeseries) {
        for incoming in &fresh.series {
            match self.series.iter_mut().find(|s| s.same_identity(incoming)) {
                Some(existing) => existing.merge_points(&incoming.points),
                None => self.series.push(incoming.clone()),
            }
        }
    }

    /// Drops every sample outside `extent`.
    pub fn crop(&mut self, extent: &Extent) {
        for series in &mut self.series {
            series.crop(extent);
        }
    }

    pub fn cropped(&self, extent: &Extent) -> Timeseries {
        let mut copy = self.clone();
        copy.crop(extent);
        copy
    }

    /// Estimated in-memory footprint in bytes.
    pub fn size(&self) -> usize {
        self.series.iter().map(Series::size).sum()
    }
}
