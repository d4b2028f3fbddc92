//! Outbound HTTP source used by the demo routes.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use super::error::InfraError;

const USER_AGENT: &str = concat!("tacky/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct Upstream {
    client: Client,
    url: String,
}

impl Upstream {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the upstream body as text. Non-success statuses are errors.
    pub async fn fetch_text(&self) -> Result<String, InfraError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        debug!(upstream = %self.url, bytes = body.len(), "upstream fetched");
        Ok(body)
    }
}
