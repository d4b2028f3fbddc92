//! Cache key derivation.
//!
//! A route's key generator maps a [`CacheRequest`] to an optional key string. `None`
//! switches caching off for that request; anything else is validated into a [`CacheKey`].

use std::fmt;

use axum::http::{HeaderMap, Method, Uri, header::COOKIE, request::Parts};

use super::error::KeyContractViolation;

/// Store namespace owned by this layer, kept apart from unrelated cached data.
pub const SEGMENT: &str = "!tacky";

/// The parts of an incoming request visible to key generators and hydrate functions.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
}

impl CacheRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        Self {
            method,
            uri,
            headers,
        }
    }

    pub fn from_parts(parts: &Parts) -> Self {
        Self::new(parts.method.clone(), parts.uri.clone(), parts.headers.clone())
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Path and query exactly as the client sent them.
    pub fn raw_url(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.uri.path())
    }

    /// Value of the named cookie, searching every `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, value)| value)
    }
}

/// A validated cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn parse(raw: String) -> Result<Self, KeyContractViolation> {
        if raw.is_empty() {
            return Err(KeyContractViolation {
                key: raw,
                reason: "key is empty",
            });
        }
        if raw.chars().any(char::is_control) {
            return Err(KeyContractViolation {
                key: raw,
                reason: "key contains control characters",
            });
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives the cache key for a request, with access to the route's bound context.
pub trait KeyGenerator<C>: Send + Sync + 'static {
    fn generate_key(&self, request: &CacheRequest, context: &C) -> Option<String>;
}

impl<C, F> KeyGenerator<C> for F
where
    F: Fn(&CacheRequest, &C) -> Option<String> + Send + Sync + 'static,
{
    fn generate_key(&self, request: &CacheRequest, context: &C) -> Option<String> {
        self(request, context)
    }
}

/// Default key generator: the raw request URL.
pub fn raw_url_key<C>(request: &CacheRequest, _context: &C) -> Option<String> {
    Some(request.raw_url().to_string())
}

pub(crate) fn resolve_key<C: 'static>(
    generator: &dyn KeyGenerator<C>,
    request: &CacheRequest,
    context: &C,
) -> Result<Option<CacheKey>, KeyContractViolation> {
    generator
        .generate_key(request, context)
        .map(CacheKey::parse)
        .transpose()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn request(uri: &str) -> CacheRequest {
        CacheRequest::new(Method::GET, uri.parse().unwrap(), HeaderMap::new())
    }

    #[test]
    fn raw_url_keeps_the_query() {
        let req = request("/posts/hello?page=2");
        assert_eq!(req.path(), "/posts/hello");
        assert_eq!(req.raw_url(), "/posts/hello?page=2");
        assert_eq!(raw_url_key(&req, &()), Some("/posts/hello?page=2".to_string()));
    }

    #[test]
    fn cookie_lookup_spans_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; foo=bar"));
        headers.append(COOKIE, HeaderValue::from_static("lang=en"));
        let req = CacheRequest::new(Method::GET, "/".parse().unwrap(), headers);

        assert_eq!(req.cookie("foo"), Some("bar"));
        assert_eq!(req.cookie("lang"), Some("en"));
        assert_eq!(req.cookie("missing"), None);
    }

    #[test]
    fn none_disables_caching() {
        let generator = |_: &CacheRequest, _: &()| -> Option<String> { None };
        let key = resolve_key(&generator, &request("/"), &()).expect("no violation");
        assert!(key.is_none());
    }

    #[test]
    fn empty_key_is_a_contract_violation() {
        let generator = |_: &CacheRequest, _: &()| -> Option<String> { Some(String::new()) };
        let err = resolve_key(&generator, &request("/"), &()).unwrap_err();
        assert_eq!(err.reason, "key is empty");
    }

    #[test]
    fn control_characters_are_rejected() {
        let err = CacheKey::parse("line\nbreak".to_string()).unwrap_err();
        assert_eq!(err.reason, "key contains control characters");
    }

    #[test]
    fn generator_sees_the_context() {
        let generator = |req: &CacheRequest, prefix: &String| -> Option<String> {
            Some(format!("{prefix}{}", req.path()))
        };
        let key = resolve_key(&generator, &request("/a"), &"v1:".to_string())
            .expect("valid key")
            .expect("caching enabled");
        assert_eq!(key.as_str(), "v1:/a");
    }
}
