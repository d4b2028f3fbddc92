//! Hydration: producing a fresh result when the cache cannot answer.

use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use super::{
    METRIC_HYDRATE_FAULT_TOTAL, METRIC_HYDRATE_MS, error::HydrationError, keys::CacheRequest,
};

/// What a hydrate function produced: the payload plus optional side-channel state.
///
/// Side state travels with the current response and is cached next to the result, but it
/// is never rendered into the body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HydrationOutcome {
    pub result: Value,
    pub side_state: Option<Value>,
}

impl HydrationOutcome {
    pub fn new(result: impl Into<Value>) -> Self {
        Self {
            result: result.into(),
            side_state: None,
        }
    }

    pub fn with_state(mut self, state: impl Into<Value>) -> Self {
        self.side_state = Some(state.into());
        self
    }
}

impl From<Value> for HydrationOutcome {
    fn from(result: Value) -> Self {
        Self::new(result)
    }
}

impl From<(Value, Value)> for HydrationOutcome {
    fn from((result, state): (Value, Value)) -> Self {
        Self::new(result).with_state(state)
    }
}

/// Production function for a cache route.
///
/// Implemented for any `Fn(CacheRequest, Arc<C>) -> impl Future<Output = Result<O, HydrationError>>`
/// where `O` converts into a [`HydrationOutcome`], so closures can return either a bare
/// [`Value`] or a `(result, state)` pair.
#[async_trait]
pub trait Hydrate<C>: Send + Sync + 'static {
    async fn hydrate(
        &self,
        request: CacheRequest,
        context: Arc<C>,
    ) -> Result<HydrationOutcome, HydrationError>;
}

#[async_trait]
impl<C, F, Fut, O> Hydrate<C> for F
where
    C: Send + Sync + 'static,
    F: Fn(CacheRequest, Arc<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, HydrationError>> + Send + 'static,
    O: Into<HydrationOutcome> + Send + 'static,
{
    async fn hydrate(
        &self,
        request: CacheRequest,
        context: Arc<C>,
    ) -> Result<HydrationOutcome, HydrationError> {
        (self)(request, context).await.map(Into::into)
    }
}

pub(crate) async fn invoke<C: Send + Sync + 'static>(
    hydrate: &dyn Hydrate<C>,
    request: CacheRequest,
    context: Arc<C>,
) -> Result<HydrationOutcome, HydrationError> {
    let started = Instant::now();
    let outcome = hydrate.hydrate(request, context).await;
    histogram!(METRIC_HYDRATE_MS).record(started.elapsed().as_secs_f64() * 1000.0);

    if let Err(error) = &outcome {
        counter!(METRIC_HYDRATE_FAULT_TOTAL).increment(1);
        debug!(
            cache = "tacky",
            status = error.status().as_u16(),
            error = %error,
            "hydration failed"
        );
    }
    outcome
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, Method, StatusCode};
    use serde_json::json;

    use super::*;

    fn request() -> CacheRequest {
        CacheRequest::new(Method::GET, "/".parse().unwrap(), HeaderMap::new())
    }

    #[test]
    fn outcome_conversions() {
        let bare = HydrationOutcome::from(json!([1, 2, 3]));
        assert_eq!(bare.result, json!([1, 2, 3]));
        assert!(bare.side_state.is_none());

        let paired = HydrationOutcome::from((json!("body"), json!({"status_code": 202})));
        assert_eq!(paired.side_state, Some(json!({"status_code": 202})));
    }

    #[tokio::test]
    async fn closure_returning_bare_result() {
        let hydrate =
            |_: CacheRequest, _: Arc<()>| async { Ok::<_, HydrationError>(json!({"foo": "bar"})) };
        let outcome = invoke(&hydrate, request(), Arc::new(())).await.unwrap();
        assert_eq!(outcome, HydrationOutcome::new(json!({"foo": "bar"})));
    }

    #[tokio::test]
    async fn closure_returning_result_and_state() {
        let hydrate = |req: CacheRequest, ctx: Arc<String>| async move {
            Ok::<_, HydrationError>((json!(req.path()), json!({ "bound": ctx.as_str() })))
        };
        let outcome = invoke(&hydrate, request(), Arc::new("ctx".to_string()))
            .await
            .unwrap();
        assert_eq!(outcome.result, json!("/"));
        assert_eq!(outcome.side_state, Some(json!({"bound": "ctx"})));
    }

    #[tokio::test]
    async fn failures_propagate() {
        let hydrate = |_: CacheRequest, _: Arc<()>| async {
            Err::<Value, _>(HydrationError::with_status(StatusCode::BAD_GATEWAY, "down"))
        };
        let err = invoke(&hydrate, request(), Arc::new(())).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.message(), "down");
    }
}
