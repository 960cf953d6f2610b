// src/core/errors.rs

//! Defines the primary error type for the entire application.

use crate::core::cache::LookupStatus;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The main error enum, representing all possible failures within the proxy.
#[derive(Error, Debug)]
pub enum DeltaCacheError {
    /// The key is absent from the cache, or its index entry has expired.
    #[error("value for key [{0}] not in cache")]
    KeyMiss(String),

    /// The key exists but was stored as bytes, not through the reference path.
    #[error("value for key [{0}] is not a reference object")]
    ReferenceMismatch(String),

    #[error("missing URL parameter: [{0}]")]
    MissingParam(String),

    #[error("unable to parse timestamp [{value}] from parameter [{param}]")]
    InvalidTimestamp { param: String, value: String },

    #[error("unable to parse duration [{value}] from parameter [{param}]")]
    InvalidDuration { param: String, value: String },

    #[error("upstream fetch failed: {0}")]
    UpstreamFetch(String),

    #[error("upstream responded with status {0}")]
    UpstreamStatus(u16),

    #[error("upstream fetch timed out after {0:?}")]
    UpstreamTimeout(Duration),

    #[error("cache store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown origin '{0}'")]
    UnknownOrigin(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Internal Error: {0}")]
    Internal(String),
}

impl DeltaCacheError {
    /// Maps a cache-lookup failure onto its `LookupStatus`, if it is one.
    pub fn lookup_status(&self) -> Option<LookupStatus> {
        match self {
            DeltaCacheError::KeyMiss(_) => Some(LookupStatus::KeyMiss),
            _ => None,
        }
    }

    /// True for malformed or missing request parameters, which are client errors.
    pub fn is_parameter_error(&self) -> bool {
        matches!(
            self,
            DeltaCacheError::MissingParam(_)
                | DeltaCacheError::InvalidTimestamp { .. }
                | DeltaCacheError::InvalidDuration { .. }
        )
    }

    /// True for failures that happened while talking to the upstream origin.
    pub fn is_upstream_error(&self) -> bool {
        matches!(
            self,
            DeltaCacheError::UpstreamFetch(_)
                | DeltaCacheError::UpstreamStatus(_)
                | DeltaCacheError::UpstreamTimeout(_)
                | DeltaCacheError::HttpClient(_)
        )
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// Shared single-flight results hand the same error to every waiter.
impl Clone for DeltaCacheError {
    fn clone(&self) -> Self {
        match self {
            DeltaCacheError::KeyMiss(k) => DeltaCacheError::KeyMiss(k.clone()),
            DeltaCacheError::ReferenceMismatch(k) => DeltaCacheError::ReferenceMismatch(k.clone()),
            DeltaCacheError::MissingParam(p) => DeltaCacheError::MissingParam(p.clone()),
            DeltaCacheError::InvalidTimestamp { param, value } => {
                DeltaCacheError::InvalidTimestamp {
                    param: param.clone(),
                    value: value.clone(),
                }
            }
            DeltaCacheError::InvalidDuration { param, value } => DeltaCacheError::InvalidDuration {
                param: param.clone(),
                value: value.clone(),
            },
            DeltaCacheError::UpstreamFetch(s) => DeltaCacheError::UpstreamFetch(s.clone()),
            DeltaCacheError::UpstreamStatus(code) => DeltaCacheError::UpstreamStatus(*code),
            DeltaCacheError::UpstreamTimeout(d) => DeltaCacheError::UpstreamTimeout(*d),
            DeltaCacheError::Store(s) => DeltaCacheError::Store(s.clone()),
            DeltaCacheError::Serialization(s) => DeltaCacheError::Serialization(s.clone()),
            DeltaCacheError::UnknownOrigin(s) => DeltaCacheError::UnknownOrigin(s.clone()),
            DeltaCacheError::Unsupported(s) => DeltaCacheError::Unsupported(s.clone()),
            DeltaCacheError::Io(e) => DeltaCacheError::Io(Arc::clone(e)),
            DeltaCacheError::HttpClient(s) => DeltaCacheError::HttpClient(s.clone()),
            DeltaCacheError::Internal(s) => DeltaCacheError::Internal(s.clone()),
        }
    }
}

impl PartialEq for DeltaCacheError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DeltaCacheError::Io(e1), DeltaCacheError::Io(e2)) => e1.to_string() == e2.to_string(),
            _ => self.to_string() == other.to_string(),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for DeltaCacheError {
    fn from(e: std::io::Error) -> Self {
        DeltaCacheError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for DeltaCacheError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return DeltaCacheError::UpstreamFetch(format!("request timed out: {e}"));
        }
        DeltaCacheError::HttpClient(e.to_string())
    }
}

impl From<serde_json::Error> for DeltaCacheError {
    fn from(e: serde_json::Error) -> Self {
        DeltaCacheError::Serialization(e.to_string())
    }
}

impl From<Arc<DeltaCacheError>> for DeltaCacheError {
    fn from(e: Arc<DeltaCacheError>) -> Self {
        DeltaCacheError::clone(&e)
    }
}
