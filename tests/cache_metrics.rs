use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
    middleware,
};
use metrics_util::debugging::DebuggingRecorder;
use serde_json::json;
use tacky::cache::{
    CacheConfig, CacheEntry, CacheRoute, CacheStore, HydrationError, MemoryStore, RequestTail,
    ResponseCache, StoreCatalog, StoreError, StoredItem, emit_cache_control,
};
use tower::ServiceExt;

struct UnavailableStore;

#[async_trait]
impl CacheStore for UnavailableStore {
    async fn get(&self, _segment: &str, _key: &str) -> Result<Option<StoredItem>, StoreError> {
        Err(StoreError::unavailable("down"))
    }

    async fn set(
        &self,
        _segment: &str,
        _key: &str,
        _entry: &CacheEntry,
        _ttl_ms: u64,
    ) -> Result<(), StoreError> {
        Err(StoreError::unavailable("down"))
    }
}

async fn drive(app: &Router, uri: &str) -> StatusCode {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    if let Some(tail) = response.extensions().get::<RequestTail>() {
        tail.wait().await;
    }
    response.status()
}

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Capacity 1 so the second key evicts the first.
    let store = Arc::new(MemoryStore::new(1, 60_000));
    let cache = ResponseCache::register(&CacheConfig::default(), &StoreCatalog::new(store))
        .expect("cache should register");
    let faulty = ResponseCache::register(
        &CacheConfig::default(),
        &StoreCatalog::new(Arc::new(UnavailableStore)),
    )
    .expect("cache should register");

    let cached = CacheRoute::builder()
        .hydrate(|_, _| async { Ok::<_, HydrationError>(json!({"ok": true})) })
        .build()
        .unwrap();
    let bypass = CacheRoute::builder()
        .hydrate(|_, _| async { Ok::<_, HydrationError>(json!("fresh")) })
        .generate_key(|_, _| None)
        .build()
        .unwrap();
    let failing = CacheRoute::builder()
        .hydrate(|_, _| async { Err::<serde_json::Value, _>(HydrationError::new("boom")) })
        .build()
        .unwrap();
    let degraded = CacheRoute::builder()
        .hydrate(|_, _| async { Ok::<_, HydrationError>(json!("degraded")) })
        .build()
        .unwrap();

    let app = Router::new()
        .route("/cached", cache.route(Method::GET, cached).unwrap())
        .route("/bypass", cache.route(Method::GET, bypass).unwrap())
        .route("/failing", cache.route(Method::GET, failing).unwrap())
        .route("/degraded", faulty.route(Method::GET, degraded).unwrap())
        .layer(middleware::from_fn(emit_cache_control));

    for (uri, status) in [
        ("/cached?a", StatusCode::OK),
        ("/cached?a", StatusCode::OK),
        ("/cached?b", StatusCode::OK),
        ("/bypass", StatusCode::OK),
        ("/failing", StatusCode::INTERNAL_SERVER_ERROR),
        ("/degraded", StatusCode::OK),
    ] {
        assert_eq!(drive(&app, uri).await, status, "{uri}");
    }

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "tacky_cache_hit_total",
        "tacky_cache_miss_total",
        "tacky_cache_bypass_total",
        "tacky_cache_read_fault_total",
        "tacky_cache_write_fault_total",
        "tacky_hydrate_fault_total",
        "tacky_hydrate_ms",
        "tacky_store_evict_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
