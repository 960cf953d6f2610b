// src/core/timeseries/wire.rs

//! JSON wire format for series exchanged with origins and clients.
//!
//! ```json
//! {"series": [{"name": "cpu", "tags": {"host": "a"}, "points": [[1500000000, 0.5]]}]}
//! ```
//!
//! Timestamps are Unix seconds and may be fractional. A `null` value marks a
//! missing sample and is dropped on decode.

use super::extent::{from_nanos, to_nanos};
use super::series::{Point, Series, Timeseries};
use crate::core::DeltaCacheError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize)]
struct WireSeries {
    name: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    points: Vec<(f64, Option<f64>)>,
}

#[derive(Serialize, Deserialize)]
struct WireBody {
    #[serde(default)]
    series: Vec<WireSeries>,
}

pub fn decode(body: &[u8]) -> Result<Timeseries, DeltaCacheError> {
    let wire: WireBody = serde_json::from_slice(body)?;
    let series = wire
        .series
        .into_iter()
        .map(|s| {
            let points = s
                .points
                .into_iter()
                .filter_map(|(secs, value)| {
                    let value = value?;
                    secs.is_finite()
                        .then(|| Point::new(from_nanos((secs * 1e9).round() as i64), value))
                })
                .collect();
            Series::new(s.name, s.tags, points)
        })
        .collect();
    Ok(Timeseries::new(series))
}

pub fn encode(timeseries: &Timeseries) -> Result<Bytes, DeltaCacheError> {
    let wire = WireBody {
        series: timeseries
            .series
            .iter()
            .map(|s| WireSeries {
                name: s.name.clone(),
                tags: s.tags.clone(),
                points: s
                    .points
                    .iter()
                    .map(|p| (to_nanos(p.timestamp) as f64 / 1e9, Some(p.value)))
                    .collect(),
            })
            .collect(),
    };
    Ok(Bytes::from(serde_json::to_vec(&wire)?))
}
