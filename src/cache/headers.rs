//! Late response hook that turns [`CacheMetadata`] into a `cache-control` header.

use axum::{
    extract::Request,
    http::{HeaderValue, header::CACHE_CONTROL},
    middleware::Next,
    response::Response,
};

use super::pipeline::CacheMetadata;
use crate::application::error::ErrorReport;

/// Middleware for `axum::middleware::from_fn`, layered over the whole router.
pub async fn emit_cache_control(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    apply_cache_control(&mut response);
    response
}

/// Overwrite `cache-control` from the response's cache metadata, if it has any.
///
/// Responses without metadata, with caching switched off, or carrying a fault report
/// are left alone.
pub fn apply_cache_control(response: &mut Response) {
    if response.extensions().get::<ErrorReport>().is_some() {
        return;
    }
    let Some(freshness) = response
        .extensions()
        .get::<CacheMetadata>()
        .and_then(|metadata| metadata.cache)
    else {
        return;
    };

    if let Ok(value) = HeaderValue::from_str(&freshness.cache_control()) {
        response.headers_mut().insert(CACHE_CONTROL, value);
    }
}
