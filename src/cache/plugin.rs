//! Plugin registration and route wiring.

use std::sync::Arc;

use axum::{
    extract::Request,
    http::Method,
    routing::{MethodRouter, get},
};
use tracing::info;

use super::{
    config::CacheConfig,
    error::ConfigurationError,
    freshness::FreshnessPolicy,
    pipeline::{CacheShared, RoutePipeline},
    route::CacheRoute,
    store::{Segment, StoreCatalog},
    tail::TailTracker,
};

/// A registered response cache. Cheap to clone; every clone shares the same store
/// segment and tail tracker.
#[derive(Clone)]
pub struct ResponseCache {
    shared: Arc<CacheShared>,
}

impl ResponseCache {
    /// Validate `config` and bind the plugin to a store from `catalog`.
    pub fn register(
        config: &CacheConfig,
        catalog: &StoreCatalog,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let store = catalog.resolve(config.cache_name.as_deref())?;
        let segment = Segment::new(store);

        info!(
            cache = "tacky",
            store = config.cache_name.as_deref().unwrap_or("_default"),
            segment = segment.name(),
            expires_in_ms = config.expires_in_ms,
            privacy = %config.privacy,
            "response cache registered"
        );

        Ok(Self {
            shared: Arc::new(CacheShared {
                policy: config.policy(),
                privacy: config.privacy,
                segment,
                tails: TailTracker::new(),
            }),
        })
    }

    pub fn policy(&self) -> FreshnessPolicy {
        self.shared.policy
    }

    /// Tracker for deferred store writes; drain it on shutdown.
    pub fn tails(&self) -> &TailTracker {
        &self.shared.tails
    }

    /// Build a handler serving `route` through the cache. Only `GET` is accepted.
    pub fn route<C, S>(
        &self,
        method: Method,
        route: CacheRoute<C>,
    ) -> Result<MethodRouter<S>, ConfigurationError>
    where
        C: Send + Sync + 'static,
        S: Clone + Send + Sync + 'static,
    {
        if method != Method::GET {
            return Err(ConfigurationError::UnsupportedMethod { method });
        }

        let pipeline = Arc::new(RoutePipeline::new(Arc::clone(&self.shared), route));
        Ok(get(move |request: Request| {
            let pipeline = Arc::clone(&pipeline);
            async move {
                let (parts, _body) = request.into_parts();
                pipeline.handle(parts).await
            }
        }))
    }
}
