//! The cache-or-hydrate request pipeline.

use std::sync::Arc;

use axum::{
    Json,
    http::request::Parts,
    response::{Html, IntoResponse, Response},
};
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tracing::{Instrument, Span, debug, instrument, warn};

use super::{
    METRIC_CACHE_BYPASS_TOTAL, METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_MISS_TOTAL,
    METRIC_CACHE_READ_FAULT_TOTAL, METRIC_CACHE_WRITE_FAULT_TOTAL,
    error::PipelineError,
    freshness::{FreshnessPolicy, FreshnessSpec, Privacy},
    hydrate::{HydrationOutcome, invoke},
    keys::{CacheRequest, resolve_key},
    route::CacheRoute,
    store::{CacheEntry, Segment},
    tail::{RequestTail, TailTracker},
};

/// Cache metadata attached to every response the pipeline produces.
///
/// `cache` is `None` when caching was switched off for the request; `state` is whatever
/// side state the hydrate function produced (or the cached copy of it).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheMetadata {
    pub cache: Option<FreshnessSpec>,
    pub state: Option<Value>,
}

/// Plugin-wide state shared by every cached route.
pub(crate) struct CacheShared {
    pub(crate) policy: FreshnessPolicy,
    pub(crate) privacy: Privacy,
    pub(crate) segment: Segment,
    pub(crate) tails: TailTracker,
}

struct Materialized {
    result: Value,
    metadata: CacheMetadata,
}

pub(crate) struct RoutePipeline<C> {
    shared: Arc<CacheShared>,
    route: CacheRoute<C>,
}

impl<C> RoutePipeline<C>
where
    C: Send + Sync + 'static,
{
    pub(crate) fn new(shared: Arc<CacheShared>, route: CacheRoute<C>) -> Self {
        Self { shared, route }
    }

    #[instrument(skip_all, fields(path = %parts.uri.path()))]
    pub(crate) async fn handle(&self, parts: Parts) -> Response {
        let request = CacheRequest::from_parts(&parts);
        let tail = self.shared.tails.begin();
        let outcome = self.materialize(request, &tail).await;
        tail.seal();

        let mut response = match outcome {
            Ok(Materialized { result, metadata }) => {
                let mut response = render(result);
                response.extensions_mut().insert(metadata);
                response
            }
            Err(err) => err.into_response(),
        };
        response.extensions_mut().insert(tail);
        response
    }

    async fn materialize(
        &self,
        request: CacheRequest,
        tail: &RequestTail,
    ) -> Result<Materialized, PipelineError> {
        let route = &self.route;
        let key = resolve_key(route.generate_key.as_ref(), &request, route.context.as_ref())?;
        let Some(key) = key else {
            counter!(METRIC_CACHE_BYPASS_TOTAL).increment(1);
            debug!(cache = "tacky", outcome = "bypass");
            let outcome = self.hydrate(request).await?;
            return Ok(Materialized {
                result: outcome.result,
                metadata: CacheMetadata {
                    cache: None,
                    state: outcome.side_state,
                },
            });
        };

        let privacy = route.privacy.unwrap_or(self.shared.privacy);

        match self.shared.segment.get(&key).await {
            Ok(Some(item)) => {
                counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
                debug!(
                    cache = "tacky",
                    outcome = "hit",
                    key = %key,
                    ttl_remaining_ms = item.ttl_remaining_ms
                );
                let freshness = self.shared.policy.replayed(
                    item.entry.stored_ttl_ms,
                    item.entry.advertised_max_age_ms,
                    item.ttl_remaining_ms,
                    privacy,
                );
                return Ok(Materialized {
                    result: item.entry.result,
                    metadata: CacheMetadata {
                        cache: Some(freshness),
                        state: item.entry.state,
                    },
                });
            }
            Ok(None) => {}
            Err(error) => {
                counter!(METRIC_CACHE_READ_FAULT_TOTAL).increment(1);
                warn!(
                    cache = "tacky",
                    key = %key,
                    error = %error,
                    "cache read failed, hydrating instead"
                );
            }
        }

        counter!(METRIC_CACHE_MISS_TOTAL).increment(1);
        debug!(cache = "tacky", outcome = "miss", key = %key);

        let outcome = self.hydrate(request).await?;
        let stored_ttl_ms = self.shared.policy.stored_ttl(route.expires_in_ms);
        let freshness = self.shared.policy.freshness(stored_ttl_ms, privacy);

        let entry = CacheEntry {
            result: outcome.result.clone(),
            state: outcome.side_state.clone(),
            stored_ttl_ms,
            advertised_max_age_ms: freshness.advertised_max_age_ms,
        };
        let segment = self.shared.segment.clone();
        tail.spawn(
            async move {
                match segment.set(&key, &entry, stored_ttl_ms).await {
                    Ok(()) => debug!(cache = "tacky", key = %key, stored_ttl_ms, "entry stored"),
                    Err(error) => {
                        counter!(METRIC_CACHE_WRITE_FAULT_TOTAL).increment(1);
                        warn!(
                            cache = "tacky",
                            key = %key,
                            error = %error,
                            "cache write failed"
                        );
                    }
                }
            }
            .instrument(Span::current()),
        );

        Ok(Materialized {
            result: outcome.result,
            metadata: CacheMetadata {
                cache: Some(freshness),
                state: outcome.side_state,
            },
        })
    }

    async fn hydrate(&self, request: CacheRequest) -> Result<HydrationOutcome, PipelineError> {
        let outcome = invoke(
            self.route.hydrate.as_ref(),
            request,
            Arc::clone(&self.route.context),
        )
        .await?;
        Ok(outcome)
    }
}

/// Strings are served as HTML; every other value as JSON.
fn render(result: Value) -> Response {
    match result {
        Value::String(body) => Html(body).into_response(),
        other => Json(other).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{StatusCode, header::CONTENT_TYPE};
    use serde_json::json;

    use super::*;

    #[test]
    fn strings_render_as_html() {
        let response = render(json!("<p>hi</p>"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/html; charset=utf-8");
    }

    #[test]
    fn values_render_as_json() {
        let response = render(json!({"foo": "bar"}));
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    }
}
