//! Demo host: two cached routes backed by an optional upstream.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use axum::{
    Router,
    http::{Method, StatusCode, Uri},
    middleware::from_fn,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

use super::middleware::{apply_state_status, log_responses, set_request_context};
use crate::{
    application::error::HttpError,
    cache::{
        CacheRequest, CacheRoute, ConfigurationError, HydrationError, ResponseCache,
        emit_cache_control,
    },
    infra::upstream::Upstream,
};

const SOURCE: &str = "infra::http::demo";

/// Produces the demo payload: the upstream body when one is configured, otherwise a
/// generated document.
#[derive(Debug, Clone, Default)]
pub struct DemoSource {
    upstream: Option<Upstream>,
}

impl DemoSource {
    pub fn new(upstream: Option<Upstream>) -> Self {
        Self { upstream }
    }

    pub async fn body(&self, request: &CacheRequest) -> Result<Value, HydrationError> {
        let Some(upstream) = self.upstream.as_ref() else {
            return Ok(json!({
                "path": request.path(),
                "generated_at_ms": unix_millis(),
            }));
        };

        upstream.fetch_text().await.map(Value::String).map_err(|err| {
            HydrationError::with_status(StatusCode::BAD_GATEWAY, "upstream unavailable")
                .with_source(err)
        })
    }
}

/// Router with `/` (plain cached upstream) and `/state` (cached upstream plus a
/// `status_code` side state applied by [`apply_state_status`]).
pub fn build_router(
    cache: &ResponseCache,
    source: DemoSource,
) -> Result<Router, ConfigurationError> {
    let home = CacheRoute::builder()
        .context(source.clone())
        .hydrate(|request, source: Arc<DemoSource>| async move { source.body(&request).await })
        .build()?;

    let stateful = CacheRoute::builder()
        .context(source)
        .hydrate(|request, source: Arc<DemoSource>| async move {
            let body = source.body(&request).await?;
            Ok::<_, HydrationError>((body, json!({ "status_code": 202 })))
        })
        .build()?;

    Ok(Router::new()
        .route("/", cache.route(Method::GET, home)?)
        .route("/state", cache.route(Method::GET, stateful)?)
        .fallback(not_found)
        .layer(from_fn(apply_state_status))
        .layer(from_fn(emit_cache_control))
        .layer(from_fn(log_responses))
        .layer(from_fn(set_request_context)))
}

async fn not_found(uri: Uri) -> Response {
    HttpError::new(
        SOURCE,
        StatusCode::NOT_FOUND,
        "Not found",
        format!("no route for {}", uri.path()),
    )
    .into_response()
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, header::CACHE_CONTROL},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::cache::{CacheConfig, CacheMetadata, RequestTail, StoreCatalog};

    fn app() -> Router {
        let cache = ResponseCache::register(&CacheConfig::default(), &StoreCatalog::default())
            .expect("registers");
        build_router(&cache, DemoSource::default()).expect("router builds")
    }

    async fn get(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn home_is_cached_with_header() {
        let app = app();
        let first = get(&app, "/").await;
        assert_eq!(first.status(), StatusCode::OK);
        assert!(
            first.headers()[CACHE_CONTROL]
                .to_str()
                .unwrap()
                .ends_with("must-revalidate")
        );
        first.extensions().get::<RequestTail>().unwrap().wait().await;

        let second = get(&app, "/").await;
        let metadata = second.extensions().get::<CacheMetadata>().unwrap();
        assert!(metadata.cache.unwrap().stored_ttl_ms <= 3_600_000);
    }

    #[tokio::test]
    async fn state_route_applies_status() {
        let app = app();
        let first = get(&app, "/state").await;
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        first.extensions().get::<RequestTail>().unwrap().wait().await;

        let cached = get(&app, "/state").await;
        assert_eq!(cached.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn unknown_paths_fall_through() {
        let response = get(&app(), "/missing").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(CACHE_CONTROL).is_none());
    }
}
