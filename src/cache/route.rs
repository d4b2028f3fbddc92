//! Per-route cache options.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;

use super::{
    error::{ConfigurationError, HydrationError},
    freshness::Privacy,
    hydrate::{Hydrate, HydrationOutcome},
    keys::{CacheRequest, KeyGenerator, raw_url_key},
};

/// Everything a cached route needs: how to produce a value, how to key it and how long
/// it stays fresh. Built with [`CacheRoute::builder`].
pub struct CacheRoute<C> {
    pub(crate) hydrate: Arc<dyn Hydrate<C>>,
    pub(crate) generate_key: Arc<dyn KeyGenerator<C>>,
    pub(crate) expires_in_ms: Option<u64>,
    pub(crate) privacy: Option<Privacy>,
    pub(crate) context: Arc<C>,
}

impl<C> Clone for CacheRoute<C> {
    fn clone(&self) -> Self {
        Self {
            hydrate: Arc::clone(&self.hydrate),
            generate_key: Arc::clone(&self.generate_key),
            expires_in_ms: self.expires_in_ms,
            privacy: self.privacy,
            context: Arc::clone(&self.context),
        }
    }
}

impl CacheRoute<()> {
    pub fn builder() -> CacheRouteBuilder<()> {
        CacheRouteBuilder {
            hydrate: None,
            generate_key: None,
            expires_in_ms: None,
            privacy: None,
            context: Arc::new(()),
        }
    }
}

impl<C> CacheRoute<C> {
    pub fn expires_in_ms(&self) -> Option<u64> {
        self.expires_in_ms
    }

    pub fn privacy(&self) -> Option<Privacy> {
        self.privacy
    }

    pub fn context(&self) -> &Arc<C> {
        &self.context
    }
}

pub struct CacheRouteBuilder<C> {
    hydrate: Option<Arc<dyn Hydrate<C>>>,
    generate_key: Option<Arc<dyn KeyGenerator<C>>>,
    expires_in_ms: Option<u64>,
    privacy: Option<Privacy>,
    context: Arc<C>,
}

impl CacheRouteBuilder<()> {
    /// Bind a context value handed to the hydrate function and key generator.
    ///
    /// Functions registered before the context was bound keep running without it.
    pub fn context<D>(self, context: D) -> CacheRouteBuilder<D>
    where
        D: Send + Sync + 'static,
    {
        CacheRouteBuilder {
            hydrate: self
                .hydrate
                .map(|inner| Arc::new(Unbound(inner)) as Arc<dyn Hydrate<D>>),
            generate_key: self
                .generate_key
                .map(|inner| Arc::new(Unbound(inner)) as Arc<dyn KeyGenerator<D>>),
            expires_in_ms: self.expires_in_ms,
            privacy: self.privacy,
            context: Arc::new(context),
        }
    }
}

impl<C> CacheRouteBuilder<C>
where
    C: Send + Sync + 'static,
{
    pub fn hydrate<F, Fut, O>(self, hydrate: F) -> Self
    where
        F: Fn(CacheRequest, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, HydrationError>> + Send + 'static,
        O: Into<HydrationOutcome> + Send + 'static,
    {
        self.hydrate_with(hydrate)
    }

    pub fn hydrate_with(mut self, hydrate: impl Hydrate<C>) -> Self {
        self.hydrate = Some(Arc::new(hydrate));
        self
    }

    pub fn generate_key<F>(mut self, generate_key: F) -> Self
    where
        F: Fn(&CacheRequest, &C) -> Option<String> + Send + Sync + 'static,
    {
        self.generate_key = Some(Arc::new(generate_key));
        self
    }

    /// Stored TTL for this route, overriding the plugin default. Zero defers to the
    /// store's own default.
    pub fn expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in_ms = Some(u64::try_from(expires_in.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn privacy(mut self, privacy: Privacy) -> Self {
        self.privacy = Some(privacy);
        self
    }

    pub fn build(self) -> Result<CacheRoute<C>, ConfigurationError> {
        let hydrate = self.hydrate.ok_or(ConfigurationError::MissingHydrate)?;
        let generate_key = self
            .generate_key
            .unwrap_or_else(|| Arc::new(raw_url_key::<C>) as Arc<dyn KeyGenerator<C>>);

        Ok(CacheRoute {
            hydrate,
            generate_key,
            expires_in_ms: self.expires_in_ms,
            privacy: self.privacy,
            context: self.context,
        })
    }
}

/// Adapts a context-free function to a route that carries a context.
struct Unbound<T: ?Sized>(Arc<T>);

#[async_trait]
impl<D> Hydrate<D> for Unbound<dyn Hydrate<()>>
where
    D: Send + Sync + 'static,
{
    async fn hydrate(
        &self,
        request: CacheRequest,
        _context: Arc<D>,
    ) -> Result<HydrationOutcome, HydrationError> {
        self.0.hydrate(request, Arc::new(())).await
    }
}

impl<D> KeyGenerator<D> for Unbound<dyn KeyGenerator<()>>
where
    D: Send + Sync + 'static,
{
    fn generate_key(&self, request: &CacheRequest, _context: &D) -> Option<String> {
        self.0.generate_key(request, &())
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, Method};
    use serde_json::{Value, json};

    use super::*;

    fn request(uri: &str) -> CacheRequest {
        CacheRequest::new(Method::GET, uri.parse().unwrap(), HeaderMap::new())
    }

    #[test]
    fn missing_hydrate_is_rejected() {
        let err = CacheRoute::builder().build().err().expect("must fail");
        assert!(matches!(err, ConfigurationError::MissingHydrate));
    }

    #[test]
    fn defaults_to_raw_url_key() {
        let route = CacheRoute::builder()
            .hydrate(|_, _| async { Ok::<_, HydrationError>(Value::Null) })
            .build()
            .expect("valid route");

        let key = route
            .generate_key
            .generate_key(&request("/a?b=c"), route.context());
        assert_eq!(key.as_deref(), Some("/a?b=c"));
        assert_eq!(route.expires_in_ms(), None);
        assert_eq!(route.privacy(), None);
    }

    #[test]
    fn overrides_are_recorded() {
        let route = CacheRoute::builder()
            .hydrate(|_, _| async { Ok::<_, HydrationError>(Value::Null) })
            .expires_in(Duration::from_secs(1000))
            .privacy(Privacy::Private)
            .build()
            .expect("valid route");

        assert_eq!(route.expires_in_ms(), Some(1_000_000));
        assert_eq!(route.privacy(), Some(Privacy::Private));
    }

    #[tokio::test]
    async fn context_reaches_hydrate_and_key() {
        let route = CacheRoute::builder()
            .context("tenant-a".to_string())
            .generate_key(|req, tenant| Some(format!("{tenant}:{}", req.path())))
            .hydrate(|_, tenant| async move {
                Ok::<_, HydrationError>(json!({ "tenant": tenant.as_str() }))
            })
            .build()
            .expect("valid route");

        let key = route
            .generate_key
            .generate_key(&request("/x"), route.context());
        assert_eq!(key.as_deref(), Some("tenant-a:/x"));

        let outcome = route
            .hydrate
            .hydrate(request("/x"), Arc::clone(route.context()))
            .await
            .unwrap();
        assert_eq!(outcome.result, json!({"tenant": "tenant-a"}));
    }

    #[tokio::test]
    async fn functions_set_before_context_still_work() {
        let route = CacheRoute::builder()
            .hydrate(|req: CacheRequest, _| async move {
                Ok::<_, HydrationError>(json!(req.path()))
            })
            .context(42u32)
            .build()
            .expect("valid route");

        let outcome = route
            .hydrate
            .hydrate(request("/early"), Arc::clone(route.context()))
            .await
            .unwrap();
        assert_eq!(outcome.result, json!("/early"));
    }
}
