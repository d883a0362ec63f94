use std::collections::HashSet;

use metrics_util::debugging::DebuggingRecorder;
use speed_optimizer::{
    cache::{CacheConfig, CacheDecision, CacheRules, PageCacheEngine},
    domain::{
        request::{PageRequest, RequestMethod},
        settings::OptimizationSettings,
        tier::Tier,
    },
};
use tempfile::tempdir;
use time::OffsetDateTime;

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let dir = tempdir().unwrap();
    let engine = PageCacheEngine::new(CacheConfig::for_content_dir(dir.path()));
    let rules = CacheRules::from_settings(&OptimizationSettings::default(), Tier::Free);
    let now = OffsetDateTime::now_utc();
    let page = format!(
        "<!DOCTYPE html><html><body>{}</body></html>",
        "<p>metrics</p>".repeat(40)
    );

    // miss, capture, hit
    let request = PageRequest::get("/metrics");
    let CacheDecision::Miss(key) = engine.classify(&request, &rules, now).await else {
        panic!("empty store must miss");
    };
    engine.capture(&key, &page).await;
    assert_eq!(engine.classify(&request, &rules, now).await.label(), "HIT");

    // fragment too short to store
    let fragment = PageRequest::get("/fragment");
    if let CacheDecision::Miss(key) = engine.classify(&fragment, &rules, now).await {
        engine.capture(&key, "<div>partial</div>").await;
    }

    // bypass, then purge
    let post = PageRequest::get("/metrics").with_method(RequestMethod::parse("POST"));
    assert_eq!(engine.classify(&post, &rules, now).await.label(), "BYPASS");
    engine.clear_all().await.unwrap();

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "speed_optimizer_page_cache_hit_total",
        "speed_optimizer_page_cache_miss_total",
        "speed_optimizer_page_cache_bypass_total",
        "speed_optimizer_page_cache_capture_skipped_total",
        "speed_optimizer_page_cache_purge_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
