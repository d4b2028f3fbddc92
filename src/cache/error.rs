//! Error taxonomy for the response cache.
//!
//! Setup-time failures are [`ConfigurationError`]. Per-request failures that reach the
//! client are collected in [`PipelineError`]. Store faults ([`StoreError`]) are logged by
//! the pipeline and never surface in a response.

use std::error::Error as StdError;

use axum::{
    Json,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::application::error::ErrorReport;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

const SOURCE: &str = "cache::pipeline";

/// Raised while registering the plugin or a route, before any request is served.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("hydrate must be provided for a cache route")]
    MissingHydrate,
    #[error("only \"GET\" methods are supported, got `{method}`")]
    UnsupportedMethod { method: Method },
    #[error("unknown cache `{name}`")]
    UnknownCache { name: String },
    #[error("invalid cache setting `{key}`: {reason}")]
    InvalidSetting { key: &'static str, reason: String },
}

impl ConfigurationError {
    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            key,
            reason: reason.into(),
        }
    }
}

/// A key generator produced something that cannot be used as a cache key.
#[derive(Debug, Error)]
#[error("key generator must return a usable key string: {reason} (got {key:?})")]
pub struct KeyContractViolation {
    pub key: String,
    pub reason: &'static str,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    #[error("cache entry codec failed: {0}")]
    Codec(#[from] serde_json::Error),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// Failure reported by a hydrate function.
///
/// Client errors (4xx) expose their message in the response body; server errors are
/// answered with a generic message and keep the detail for the logs.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HydrationError {
    status: StatusCode,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl HydrationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an arbitrary failure. The cause stays in the source chain only.
    pub fn from_error(error: impl Into<BoxError>) -> Self {
        Self::new("hydrate function failed").with_source(error)
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Per-request failures that decide the client-visible outcome.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    KeyContract(#[from] KeyContractViolation),
    #[error("hydration failed")]
    Hydration(#[from] HydrationError),
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::KeyContract(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::Hydration(err) => err.status(),
        }
    }

    fn public_message(&self) -> &str {
        match self {
            PipelineError::Hydration(err) if err.status().is_client_error() => err.message(),
            _ => "An internal server error occurred",
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "status_code": status.as_u16(),
            "error": status.canonical_reason().unwrap_or("Unknown Error"),
            "message": self.public_message(),
        });
        let report = ErrorReport::from_error(SOURCE, status, &self);
        let mut response = (status, Json(body)).into_response();
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_hide_the_detail() {
        let err = PipelineError::from(HydrationError::new("database exploded"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "An internal server error occurred");
    }

    #[test]
    fn client_errors_expose_their_message() {
        let err = PipelineError::from(HydrationError::with_status(
            StatusCode::NOT_FOUND,
            "no such article",
        ));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.public_message(), "no such article");
    }

    #[test]
    fn error_response_carries_report_chain() {
        let err = PipelineError::from(
            HydrationError::new("upstream failed").with_source(StoreError::unavailable("boom")),
        );
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("error report attached");
        assert_eq!(report.source, SOURCE);
        assert_eq!(
            report.messages,
            vec![
                "hydration failed".to_string(),
                "upstream failed".to_string(),
                "cache store unavailable: boom".to_string(),
            ]
        );
    }

    #[test]
    fn wrapped_errors_keep_cause_once_in_chain() {
        let err = PipelineError::from(HydrationError::from_error(StoreError::unavailable(
            "connection refused",
        )));
        let response = err.into_response();
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("error report attached");
        assert_eq!(
            report.messages,
            vec![
                "hydration failed".to_string(),
                "hydrate function failed".to_string(),
                "cache store unavailable: connection refused".to_string(),
            ]
        );
    }
}
