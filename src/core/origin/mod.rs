// src/core/origin/mod.rs

//! The upstream fetch contract and its HTTP implementation.

pub mod caql;
pub mod http;

pub use http::HttpOrigin;

use crate::config::OriginConfig;
use crate::core::DeltaCacheError;
use crate::core::timeseries::{TimeRangeQuery, Timeseries};
use async_trait::async_trait;
use axum::http::HeaderMap;
use bytes::Bytes;

/// Decoded series returned by an origin for one sub-extent.
#[derive(Debug, Clone, Default)]
pub struct UpstreamSeries {
    pub series: Timeseries,
    /// False when the origin asked for the response not to be stored.
    pub cacheable: bool,
}

/// A raw upstream response passed through without decoding.
#[derive(Debug, Clone, Default)]
pub struct UpstreamObject {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub cacheable: bool,
}

impl UpstreamObject {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A pass-through request for a non-timeseries resource.
#[derive(Debug, Clone, Default)]
pub struct ObjectRequest {
    pub path: String,
    pub query: Option<String>,
    /// Headers received from the client.
    pub headers: HeaderMap,
    pub remote_addr: String,
}

/// An upstream time-series backend.
///
/// `fetch_timeseries` receives a query already scoped to the sub-extent that
/// should be fetched. Implementations do not retry.
#[async_trait]
pub trait Origin: Send + Sync {
    fn name(&self) -> &str;

    fn config(&self) -> &OriginConfig;

    async fn fetch_timeseries(&self, query: &TimeRangeQuery)
    -> Result<UpstreamSeries, DeltaCacheError>;

    /// Fetches a non-timeseries resource such as a metric discovery listing.
    async fn fetch_object(
        &self,
        request: &ObjectRequest,
    ) -> Result<UpstreamObject, DeltaCacheError> {
        Err(DeltaCacheError::Unsupported(format!(
            "origin '{}' cannot proxy '{}'",
            self.name(),
            request.path
        )))
    }
}

/// Reads `Cache-Control` and decides whether a response may be stored.
pub fn is_cacheable(cache_control: Option<&str>) -> bool {
    let Some(value) = cache_control else {
        return true;
    };
    !value.split(',').any(|directive| {
        let directive = directive.trim();
        directive.eq_ignore_ascii_case("no-store")
            || directive.eq_ignore_ascii_case("no-cache")
            || directive.eq_ignore_ascii_case("private")
    })
}
