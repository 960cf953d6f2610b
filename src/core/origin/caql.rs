// src/core/origin/caql.rs

//! Maps CAQL-style request parameters to and from a [`TimeRangeQuery`].

use crate::core::DeltaCacheError;
use crate::core::timeseries::extent::{step_nanos, to_nanos};
use crate::core::timeseries::query::{parse_step, parse_timestamp};
use crate::core::timeseries::{Extent, TimeRangeQuery, align_extent};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

pub const PARAM_QUERY: &str = "query";
pub const PARAM_QUERY_SHORT: &str = "q";
pub const PARAM_START: &str = "start";
pub const PARAM_END: &str = "end";
pub const PARAM_PERIOD: &str = "period";

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Parameters the proxy interprets itself rather than passing through.
const RESERVED_PARAMS: [&str; 5] = [
    PARAM_QUERY,
    PARAM_QUERY_SHORT,
    PARAM_START,
    PARAM_END,
    PARAM_PERIOD,
];

fn param<'a>(params: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

fn required<'a>(params: &'a HashMap<String, String>, name: &str) -> Result<&'a str, DeltaCacheError> {
    param(params, name).ok_or_else(|| DeltaCacheError::MissingParam(name.to_string()))
}

/// Builds a time range query from inbound request parameters.
///
/// The statement comes from `query`, falling back to `q`. A bare numeric
/// `period` is read as seconds. Every other parameter is kept on the query and
/// passed through to the origin.
pub fn parse_time_range_query(
    params: &HashMap<String, String>,
) -> Result<TimeRangeQuery, DeltaCacheError> {
    let statement = param(params, PARAM_QUERY)
        .or_else(|| param(params, PARAM_QUERY_SHORT))
        .ok_or_else(|| {
            DeltaCacheError::MissingParam(format!("{PARAM_QUERY} or {PARAM_QUERY_SHORT}"))
        })?;

    let start = parse_timestamp(PARAM_START, required(params, PARAM_START)?)?;
    let end = parse_timestamp(PARAM_END, required(params, PARAM_END)?)?;

    let period = required(params, PARAM_PERIOD)?;
    let step = if period.chars().all(|c| c.is_ascii_digit()) {
        parse_step(PARAM_PERIOD, &format!("{period}s"))
    } else {
        parse_step(PARAM_PERIOD, period)
    }
    .map_err(|_| DeltaCacheError::InvalidDuration {
        param: PARAM_PERIOD.to_string(),
        value: period.to_string(),
    })?;

    let extra = params
        .iter()
        .filter(|(name, _)| !RESERVED_PARAMS.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()));
    Ok(TimeRangeQuery::new(statement, Extent::new(start, end), step).with_params(extra))
}

/// Formats a timestamp as Unix seconds, with a fractional part only when needed.
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    let nanos = to_nanos(t);
    let secs = nanos.div_euclid(NANOS_PER_SEC);
    let frac = nanos.rem_euclid(NANOS_PER_SEC);
    if frac == 0 {
        return secs.to_string();
    }
    let digits = format!("{frac:09}");
    format!("{secs}.{}", digits.trim_end_matches('0'))
}

fn format_period(step: Duration) -> String {
    let nanos = step_nanos(step);
    if nanos % NANOS_PER_SEC == 0 {
        (nanos / NANOS_PER_SEC).to_string()
    } else {
        format!("{}", step.as_secs_f64())
    }
}

fn replace_params(url: &mut Url, replacements: &[(&str, String)]) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !replacements.iter().any(|(name, _)| k == name))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut pairs = url.query_pairs_mut();
    pairs.clear();
    for (k, v) in &kept {
        pairs.append_pair(k, v);
    }
    for (k, v) in replacements {
        pairs.append_pair(k, v);
    }
}

/// Rewrites the `start` and `end` parameters of `url` to the step-aligned `extent`.
/// A zero extent leaves the URL unchanged.
pub fn set_extent(url: &mut Url, extent: &Extent, step: Duration) {
    if extent.is_zero() {
        return;
    }
    let aligned = align_extent(extent, step);
    replace_params(
        url,
        &[
            (PARAM_START, format_timestamp(aligned.start)),
            (PARAM_END, format_timestamp(aligned.end)),
        ],
    );
}

/// Builds the upstream URL for `query`, scoped to its extent and carrying its
/// pass-through parameters.
pub fn upstream_url(base: &Url, path: &str, query: &TimeRangeQuery) -> Url {
    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url.set_query(None);
    if !query.params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in &query.params {
            pairs.append_pair(name, value);
        }
    }
    replace_params(
        &mut url,
        &[
            (PARAM_QUERY, query.statement.clone()),
            (PARAM_PERIOD, format_period(query.step)),
        ],
    );
    set_extent(&mut url, &query.extent, query.step);
    url
}
