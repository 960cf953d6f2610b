// tests/integration/delta_engine_test.rs

//! End-to-end behaviour of the delta proxy engine against a mock origin.

use super::fixtures::{DeltaFixture, STEP, query};
use super::test_helpers::{
    BytesOnlyCache, FailingStoreCache, MockOrigin, init_tracing, mock_origin_config, timestamps,
};
use chrono::{DateTime, Utc};
use deltacache::core::DeltaCacheError;
use deltacache::core::cache::{Cache, LookupStatus};
use deltacache::core::engine::{
    CachedTimeseries, DeltaProxyCache, FastForwardStatus, RequestOptions,
};
use deltacache::core::metrics::WRITEBACK_FAILURES_TOTAL;
use deltacache::core::origin::Origin;
use deltacache::core::timeseries::{Extent, ExtentList};
use std::sync::Arc;

fn fixed_clock(secs: i64) -> Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> {
    let now = DateTime::from_timestamp(secs, 0).unwrap();
    Arc::new(move || now)
}

async fn cached_entry(fixture: &DeltaFixture, start: i64, end: i64) -> Arc<CachedTimeseries> {
    let key = query(start, end).cache_key(fixture.origin.name());
    let (object, _) = fixture.cache.retrieve_reference(&key, false).await.unwrap();
    object.into_any().downcast::<CachedTimeseries>().unwrap()
}

#[tokio::test]
async fn test_delta_scenario_keymiss_hit_rangemiss() {
    init_tracing();
    let fx = DeltaFixture::new().await;

    // 1. Empty cache: the whole window is fetched.
    let first = fx.engine.fetch(&query(0, 180), RequestOptions::default()).await.unwrap();
    assert_eq!(first.status, LookupStatus::KeyMiss);
    assert_eq!(first.fetched.as_slice(), &[Extent::from_unix(0, 180)]);
    assert_eq!(timestamps(&first.series), vec![0, 60, 120, 180]);
    assert_eq!(fx.origin.calls(), 1);

    // 2. Fully covered: served without touching the origin.
    let second = fx.engine.fetch(&query(60, 120), RequestOptions::default()).await.unwrap();
    assert_eq!(second.status, LookupStatus::Hit);
    assert!(second.fetched.is_empty());
    assert_eq!(timestamps(&second.series), vec![60, 120]);
    assert_eq!(fx.origin.calls(), 1);

    // 3. Partially covered: only the tail is fetched.
    let third = fx.engine.fetch(&query(120, 300), RequestOptions::default()).await.unwrap();
    assert_eq!(third.status, LookupStatus::RangeMiss);
    assert_eq!(third.fetched.as_slice(), &[Extent::from_unix(180, 300)]);
    assert_eq!(timestamps(&third.series), vec![120, 180, 240, 300]);
    assert_eq!(fx.origin.calls(), 2);
    assert_eq!(fx.origin.requested()[1], Extent::from_unix(180, 300));

    let entry = cached_entry(&fx, 120, 300).await;
    assert_eq!(entry.extents.as_slice(), &[Extent::from_unix(0, 300)]);
    assert_eq!(timestamps(&entry.series), vec![0, 60, 120, 180, 240, 300]);
}

#[tokio::test]
async fn test_gap_in_the_middle_is_fetched_alone() {
    let fx = DeltaFixture::new().await;
    fx.engine.fetch(&query(0, 120), RequestOptions::default()).await.unwrap();
    fx.engine.fetch(&query(600, 720), RequestOptions::default()).await.unwrap();

    let response = fx.engine.fetch(&query(0, 720), RequestOptions::default()).await.unwrap();
    assert_eq!(response.status, LookupStatus::RangeMiss);
    assert_eq!(response.fetched.as_slice(), &[Extent::from_unix(120, 600)]);
    assert_eq!(timestamps(&response.series).len(), 13);

    let entry = cached_entry(&fx, 0, 720).await;
    assert_eq!(entry.extents.as_slice(), &[Extent::from_unix(0, 720)]);
}

#[tokio::test]
async fn test_disjoint_request_is_a_keymiss_for_the_whole_window() {
    let fx = DeltaFixture::new().await;
    fx.engine.fetch(&query(0, 120), RequestOptions::default()).await.unwrap();

    let response = fx.engine.fetch(&query(3600, 3720), RequestOptions::default()).await.unwrap();
    assert_eq!(response.status, LookupStatus::KeyMiss);
    assert_eq!(response.fetched.as_slice(), &[Extent::from_unix(3600, 3720)]);

    // Both runs stay cached under the same key.
    let entry = cached_entry(&fx, 0, 120).await;
    assert_eq!(
        entry.extents.as_slice(),
        &[Extent::from_unix(0, 120), Extent::from_unix(3600, 3720)]
    );
}

#[tokio::test]
async fn test_unaligned_request_is_aligned_to_step() {
    let fx = DeltaFixture::new().await;
    let response = fx.engine.fetch(&query(61, 179), RequestOptions::default()).await.unwrap();
    assert_eq!(response.extent, Extent::from_unix(60, 120));
    assert_eq!(fx.origin.requested(), vec![Extent::from_unix(60, 120)]);
}

#[tokio::test]
async fn test_purge_refetches_and_reports_purge() {
    let fx = DeltaFixture::new().await;
    fx.engine.fetch(&query(0, 180), RequestOptions::default()).await.unwrap();

    let response = fx
        .engine
        .fetch(&query(60, 120), RequestOptions { purge: true })
        .await
        .unwrap();
    assert_eq!(response.status, LookupStatus::Purge);
    assert_eq!(response.fetched.as_slice(), &[Extent::from_unix(60, 120)]);
    assert_eq!(fx.origin.calls(), 2);

    // The rebuilt entry only covers what the purge request fetched.
    let entry = cached_entry(&fx, 60, 120).await;
    assert_eq!(entry.extents.as_slice(), &[Extent::from_unix(60, 120)]);
}

#[tokio::test]
async fn test_upstream_failure_propagates_and_leaves_cache_untouched() {
    let fx = DeltaFixture::new().await;
    fx.origin.set_failing(true);

    let err = fx
        .engine
        .fetch(&query(0, 180), RequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, DeltaCacheError::UpstreamStatus(500));
    assert!(err.is_upstream_error());
    assert_eq!(fx.cache.object_count(), 0);

    fx.origin.set_failing(false);
    let response = fx.engine.fetch(&query(0, 180), RequestOptions::default()).await.unwrap();
    assert_eq!(response.status, LookupStatus::KeyMiss);
    assert_eq!(fx.origin.calls(), 2);
}

#[tokio::test]
async fn test_failed_gap_keeps_previous_cache_contents() {
    let fx = DeltaFixture::new().await;
    fx.engine.fetch(&query(0, 180), RequestOptions::default()).await.unwrap();

    fx.origin.set_failing(true);
    assert!(fx.engine.fetch(&query(0, 600), RequestOptions::default()).await.is_err());

    let entry = cached_entry(&fx, 0, 180).await;
    assert_eq!(entry.extents.as_slice(), &[Extent::from_unix(0, 180)]);
}

#[tokio::test]
async fn test_uncacheable_response_is_served_but_not_stored() {
    let fx = DeltaFixture::new().await;
    fx.origin.set_cacheable(false);

    let first = fx.engine.fetch(&query(0, 180), RequestOptions::default()).await.unwrap();
    assert_eq!(timestamps(&first.series), vec![0, 60, 120, 180]);
    assert_eq!(fx.cache.object_count(), 0);

    let second = fx.engine.fetch(&query(0, 180), RequestOptions::default()).await.unwrap();
    assert_eq!(second.status, LookupStatus::KeyMiss);
    assert_eq!(fx.origin.calls(), 2);
}

#[tokio::test]
async fn test_bytes_only_cache_round_trips_serialized_entries() {
    let cache = Arc::new(BytesOnlyCache::new("bytes"));
    cache.connect().await.unwrap();
    let origin = Arc::new(MockOrigin::named("bytes"));
    let engine = DeltaProxyCache::new(cache.clone() as Arc<dyn Cache>, origin.clone() as Arc<dyn Origin>);

    let first = engine.fetch(&query(0, 180), RequestOptions::default()).await.unwrap();
    assert_eq!(first.status, LookupStatus::KeyMiss);
    assert_eq!(cache.inner.object_count(), 1);

    let second = engine.fetch(&query(0, 120), RequestOptions::default()).await.unwrap();
    assert_eq!(second.status, LookupStatus::Hit);
    assert_eq!(timestamps(&second.series), vec![0, 60, 120]);
    assert_eq!(origin.calls(), 1);
}

#[tokio::test]
async fn test_corrupt_bytes_entry_is_treated_as_a_miss() {
    let cache = Arc::new(BytesOnlyCache::new("corrupt"));
    let origin = Arc::new(MockOrigin::named("corrupt"));
    let engine = DeltaProxyCache::new(cache.clone() as Arc<dyn Cache>, origin.clone() as Arc<dyn Origin>);

    let key = query(0, 180).cache_key("corrupt");
    cache
        .store(&key, bytes::Bytes::from_static(b"not json"), STEP)
        .await
        .unwrap();

    let response = engine.fetch(&query(0, 180), RequestOptions::default()).await.unwrap();
    assert_eq!(response.status, LookupStatus::KeyMiss);
    assert_eq!(origin.calls(), 1);
}

#[tokio::test]
async fn test_request_end_is_clamped_to_now() {
    let fx = DeltaFixture::new().await;
    let engine = DeltaProxyCache::new(
        fx.cache.clone() as Arc<dyn Cache>,
        fx.origin.clone() as Arc<dyn Origin>,
    )
    .with_clock(fixed_clock(630));

    let response = engine.fetch(&query(0, 100_000), RequestOptions::default()).await.unwrap();
    assert_eq!(response.extent, Extent::from_unix(0, 600));
    assert_eq!(fx.origin.requested(), vec![Extent::from_unix(0, 600)]);
}

#[tokio::test]
async fn test_fast_forward_adds_current_bucket_without_caching_it() {
    let mut config = mock_origin_config("ff");
    config.fast_forward_disable = false;
    let fx = DeltaFixture::with_config(config).await;
    let engine = DeltaProxyCache::new(
        fx.cache.clone() as Arc<dyn Cache>,
        fx.origin.clone() as Arc<dyn Origin>,
    )
    .with_clock(fixed_clock(630));

    let response = engine.fetch(&query(0, 630), RequestOptions::default()).await.unwrap();
    assert_eq!(response.ff_status, FastForwardStatus::Miss);
    assert_eq!(fx.origin.calls(), 2);
    assert!(fx.origin.requested().contains(&Extent::from_unix(600, 660)));
    assert_eq!(timestamps(&response.series).last(), Some(&660));
    assert!(
        response
            .result_header()
            .unwrap()
            .ends_with("ffstatus=miss")
    );

    let key = query(0, 630).cache_key("ff");
    let (object, _) = fx.cache.retrieve_reference(&key, false).await.unwrap();
    let entry = object.into_any().downcast::<CachedTimeseries>().unwrap();
    assert_eq!(entry.extents.as_slice(), &[Extent::from_unix(0, 600)]);
}

#[tokio::test]
async fn test_fast_forward_is_off_for_historical_windows() {
    let mut config = mock_origin_config("history");
    config.fast_forward_disable = false;
    let fx = DeltaFixture::with_config(config).await;
    let engine = DeltaProxyCache::new(
        fx.cache.clone() as Arc<dyn Cache>,
        fx.origin.clone() as Arc<dyn Origin>,
    )
    .with_clock(fixed_clock(86_400));

    let response = engine.fetch(&query(0, 180), RequestOptions::default()).await.unwrap();
    assert_eq!(response.ff_status, FastForwardStatus::Off);
    assert_eq!(fx.origin.calls(), 1);
}

#[tokio::test]
async fn test_retention_crops_cached_series() {
    let mut config = mock_origin_config("retention");
    config.timeseries_retention_factor = 2;
    let fx = DeltaFixture::with_config(config).await;

    let first = fx.engine.fetch(&query(0, 300), RequestOptions::default()).await.unwrap();
    // The response itself is not cropped.
    assert_eq!(timestamps(&first.series).len(), 6);

    let entry = cached_entry(&fx, 0, 300).await;
    assert_eq!(entry.extents.as_slice(), &[Extent::from_unix(180, 300)]);
    assert_eq!(timestamps(&entry.series), vec![180, 240, 300]);

    let second = fx.engine.fetch(&query(0, 300), RequestOptions::default()).await.unwrap();
    assert_eq!(second.status, LookupStatus::RangeMiss);
    assert_eq!(second.fetched.as_slice(), &[Extent::from_unix(0, 180)]);
}

#[tokio::test]
async fn test_result_header_reports_engine_status_and_fetches() {
    let fx = DeltaFixture::new().await;
    let response = fx.engine.fetch(&query(0, 180), RequestOptions::default()).await.unwrap();
    assert_eq!(
        response.result_header().as_deref(),
        Some("engine=DeltaProxyCache; status=keymiss; fetched=[0:180]; ffstatus=off")
    );

    let hit = fx.engine.fetch(&query(0, 180), RequestOptions::default()).await.unwrap();
    assert_eq!(
        hit.result_header().as_deref(),
        Some("engine=DeltaProxyCache; status=hit; ffstatus=off")
    );
}

#[tokio::test]
async fn test_cached_extents_stay_normalized() {
    let fx = DeltaFixture::new().await;
    for (start, end) in [(600, 720), (0, 120), (120, 240), (240, 600)] {
        fx.engine
            .fetch(&query(start, end), RequestOptions::default())
            .await
            .unwrap();
    }
    let entry = cached_entry(&fx, 0, 0).await;
    assert_eq!(
        entry.extents,
        ExtentList::from_extents([Extent::from_unix(0, 720)], STEP)
    );
    assert_eq!(timestamps(&entry.series).len(), 13);
}

#[tokio::test]
async fn test_open_bucket_is_served_but_never_cached() {
    let fx = DeltaFixture::new().await;
    let at = |secs| {
        DeltaProxyCache::new(
            fx.cache.clone() as Arc<dyn Cache>,
            fx.origin.clone() as Arc<dyn Origin>,
        )
        .with_clock(fixed_clock(secs))
    };

    // At 1000s the bucket [960, 1020) is still filling.
    let first = at(1000).fetch(&query(990, 1000), RequestOptions::default()).await.unwrap();
    assert_eq!(first.extent, Extent::from_unix(960, 960));
    assert_eq!(first.status, LookupStatus::KeyMiss);
    assert_eq!(timestamps(&first.series), vec![960]);
    assert_eq!(fx.cache.object_count(), 0);

    // Once it has closed, the whole window comes from upstream.
    let later = at(1100).fetch(&query(960, 1020), RequestOptions::default()).await.unwrap();
    assert_eq!(later.status, LookupStatus::KeyMiss);
    assert_eq!(later.fetched.as_slice(), &[Extent::from_unix(960, 1020)]);
    assert_eq!(fx.origin.calls(), 2);
    assert_eq!(timestamps(&later.series), vec![960, 1020]);
}

#[tokio::test]
async fn test_window_reaching_now_stops_at_the_open_bucket() {
    let fx = DeltaFixture::new().await;
    let engine = DeltaProxyCache::new(
        fx.cache.clone() as Arc<dyn Cache>,
        fx.origin.clone() as Arc<dyn Origin>,
    )
    .with_clock(fixed_clock(1000));

    let response = engine.fetch(&query(600, 5_000), RequestOptions::default()).await.unwrap();
    assert_eq!(response.extent, Extent::from_unix(600, 960));

    let entry = cached_entry(&fx, 600, 960).await;
    let outer = entry.extents.outer_extent().unwrap();
    assert!(outer.end <= DateTime::from_timestamp(960, 0).unwrap());
}

#[tokio::test]
async fn test_repeated_request_returns_identical_series() {
    let fx = DeltaFixture::new().await;
    fx.engine.fetch(&query(0, 120), RequestOptions::default()).await.unwrap();
    fx.engine.fetch(&query(240, 360), RequestOptions::default()).await.unwrap();

    let merged = fx.engine.fetch(&query(0, 360), RequestOptions::default()).await.unwrap();
    assert_eq!(merged.status, LookupStatus::RangeMiss);

    let again = fx.engine.fetch(&query(0, 360), RequestOptions::default()).await.unwrap();
    assert_eq!(again.status, LookupStatus::Hit);
    assert_eq!(again.series, merged.series);
    assert_eq!(timestamps(&again.series), vec![0, 60, 120, 180, 240, 300, 360]);
    assert_eq!(fx.origin.calls(), 3);
}

#[tokio::test]
async fn test_writeback_failure_still_serves_the_response() {
    init_tracing();
    let cache = Arc::new(FailingStoreCache::new("failing-store"));
    cache.connect().await.unwrap();
    let origin = Arc::new(MockOrigin::named("failing-store"));
    let engine = DeltaProxyCache::new(cache.clone() as Arc<dyn Cache>, origin.clone() as Arc<dyn Origin>);
    let failures = WRITEBACK_FAILURES_TOTAL.with_label_values(&["failing-store"]);
    let before = failures.get();

    let response = engine.fetch(&query(0, 180), RequestOptions::default()).await.unwrap();
    assert_eq!(response.status, LookupStatus::KeyMiss);
    assert_eq!(timestamps(&response.series), vec![0, 60, 120, 180]);
    assert_eq!(failures.get(), before + 1.0);

    // Nothing was stored, so the next request misses again.
    let again = engine.fetch(&query(0, 180), RequestOptions::default()).await.unwrap();
    assert_eq!(again.status, LookupStatus::KeyMiss);
    assert_eq!(again.series, response.series);
    assert_eq!(origin.calls(), 2);
    assert_eq!(failures.get(), before + 2.0);
}

#[tokio::test]
async fn test_pass_through_params_reach_origin_and_split_entries() {
    let fx = DeltaFixture::new().await;
    let tenant_a = query(0, 180).with_params([("account", "a")]);
    let tenant_b = query(0, 180).with_params([("account", "b")]);

    fx.engine.fetch(&tenant_a, RequestOptions::default()).await.unwrap();
    let seen = fx.origin.last_query().unwrap();
    assert_eq!(seen.params.get("account").map(String::as_str), Some("a"));

    let other = fx.engine.fetch(&tenant_b, RequestOptions::default()).await.unwrap();
    assert_eq!(other.status, LookupStatus::KeyMiss);
    assert_eq!(fx.cache.object_count(), 2);

    let hit = fx.engine.fetch(&tenant_a, RequestOptions::default()).await.unwrap();
    assert_eq!(hit.status, LookupStatus::Hit);
    assert_eq!(fx.origin.calls(), 2);
}
