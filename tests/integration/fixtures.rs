// tests/integration/fixtures.rs

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use super::test_helpers::{MockOrigin, memory_cache, mock_origin_config};
use deltacache::config::OriginConfig;
use deltacache::core::cache::{Cache, MemoryCache};
use deltacache::core::engine::{DeltaProxyCache, ObjectProxyCache};
use deltacache::core::origin::Origin;
use deltacache::core::timeseries::{Extent, TimeRangeQuery};
use std::sync::Arc;
use std::time::Duration;

pub const STATEMENT: &str = "histogram:average(\"cpu\")";
pub const STEP: Duration = Duration::from_secs(60);

/// A 60s-step query over `[start, end]` Unix seconds.
pub fn query(start: i64, end: i64) -> TimeRangeQuery {
    TimeRangeQuery::new(STATEMENT, Extent::from_unix(start, end), STEP)
}

/// A delta engine over a fresh memory cache and the given mock origin.
pub struct DeltaFixture {
    pub cache: Arc<MemoryCache>,
    pub origin: Arc<MockOrigin>,
    pub engine: DeltaProxyCache,
}

impl DeltaFixture {
    pub async fn new() -> Self {
        Self::with_origin(MockOrigin::named("test")).await
    }

    pub async fn with_config(config: OriginConfig) -> Self {
        Self::with_origin(MockOrigin::new(config)).await
    }

    pub async fn with_origin(origin: MockOrigin) -> Self {
        let cache = memory_cache("delta").await;
        let origin = Arc::new(origin);
        let engine = DeltaProxyCache::new(
            cache.clone() as Arc<dyn Cache>,
            origin.clone() as Arc<dyn Origin>,
        );
        Self {
            cache,
            origin,
            engine,
        }
    }
}

/// An object engine over a fresh memory cache and a mock origin.
pub struct ObjectFixture {
    pub cache: Arc<MemoryCache>,
    pub origin: Arc<MockOrigin>,
    pub engine: ObjectProxyCache,
}

impl ObjectFixture {
    pub async fn new() -> Self {
        let cache = memory_cache("object").await;
        let origin = Arc::new(MockOrigin::new(mock_origin_config("objects")));
        let engine = ObjectProxyCache::new(
            cache.clone() as Arc<dyn Cache>,
            origin.clone() as Arc<dyn Origin>,
        );
        Self {
            cache,
            origin,
            engine,
        }
    }
}
