// tests/integration/object_engine_test.rs

//! Whole-object caching for non-timeseries requests.

use super::fixtures::ObjectFixture;
use deltacache::core::DeltaCacheError;
use deltacache::core::cache::{Cache, LookupStatus};
use deltacache::core::engine::object::object_key;
use deltacache::core::engine::{CachedTimeseries, RequestOptions};
use deltacache::core::origin::{ObjectRequest, Origin};
use std::sync::Arc;
use std::time::Duration;

fn find(query: &str) -> ObjectRequest {
    ObjectRequest {
        path: "/find".to_string(),
        query: Some(query.to_string()),
        ..ObjectRequest::default()
    }
}

#[tokio::test]
async fn test_object_is_cached_after_first_fetch() {
    let fx = ObjectFixture::new().await;

    let first = fx.engine.fetch(&find("query=cpu"), RequestOptions::default()).await.unwrap();
    assert_eq!(first.status, LookupStatus::KeyMiss);
    assert_eq!(&first.object.body[..], b"/find?query=cpu");

    let second = fx.engine.fetch(&find("query=cpu"), RequestOptions::default()).await.unwrap();
    assert_eq!(second.status, LookupStatus::Hit);
    assert_eq!(second.object.body, first.object.body);
    assert_eq!(second.object.content_type.as_deref(), Some("application/json"));
    assert_eq!(fx.origin.object_calls(), 1);
    assert_eq!(
        second.result_header().as_deref(),
        Some("engine=ObjectProxyCache; status=hit")
    );
}

#[tokio::test]
async fn test_distinct_queries_use_distinct_keys() {
    let fx = ObjectFixture::new().await;
    fx.engine.fetch(&find("query=cpu"), RequestOptions::default()).await.unwrap();
    fx.engine.fetch(&find("query=mem"), RequestOptions::default()).await.unwrap();
    assert_eq!(fx.origin.object_calls(), 2);
    assert_eq!(fx.cache.object_count(), 2);
}

#[tokio::test]
async fn test_purge_refetches_object() {
    let fx = ObjectFixture::new().await;
    fx.engine.fetch(&find("query=cpu"), RequestOptions::default()).await.unwrap();
    let purged = fx
        .engine
        .fetch(&find("query=cpu"), RequestOptions { purge: true })
        .await
        .unwrap();
    assert_eq!(purged.status, LookupStatus::Purge);
    assert_eq!(fx.origin.object_calls(), 2);
}

#[tokio::test]
async fn test_uncacheable_object_is_not_stored() {
    let fx = ObjectFixture::new().await;
    fx.origin.set_cacheable(false);
    fx.engine.fetch(&find("query=cpu"), RequestOptions::default()).await.unwrap();
    fx.engine.fetch(&find("query=cpu"), RequestOptions::default()).await.unwrap();
    assert_eq!(fx.origin.object_calls(), 2);
    assert_eq!(fx.cache.object_count(), 0);
}

#[tokio::test]
async fn test_object_upstream_failure_is_returned() {
    let fx = ObjectFixture::new().await;
    fx.origin.set_failing(true);
    let err = fx
        .engine
        .fetch(&find("query=cpu"), RequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, DeltaCacheError::UpstreamStatus(503));
    assert_eq!(fx.cache.object_count(), 0);
}

#[tokio::test]
async fn test_unreadable_cached_object_is_refetched() {
    let fx = ObjectFixture::new().await;
    let request = find("query=cpu");
    let key = object_key(fx.origin.name(), &request);
    let foreign = CachedTimeseries {
        extents: Default::default(),
        step: Duration::from_secs(60),
        series: Default::default(),
    };
    fx.cache
        .store_reference(&key, Arc::new(foreign), Duration::from_secs(60))
        .await
        .unwrap();

    let first = fx.engine.fetch(&request, RequestOptions::default()).await.unwrap();
    assert_eq!(first.status, LookupStatus::KeyMiss);
    assert_eq!(&first.object.body[..], b"/find?query=cpu");
    assert_eq!(fx.origin.object_calls(), 1);

    let second = fx.engine.fetch(&request, RequestOptions::default()).await.unwrap();
    assert_eq!(second.status, LookupStatus::Hit);
    assert_eq!(fx.origin.object_calls(), 1);
}
