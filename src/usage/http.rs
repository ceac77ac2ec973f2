//! HTTP usage sink.

use std::time::Duration;

use url::Url;

use super::{UsageError, UsageEvent, UsageSink};

/// Posts usage records as JSON to `{base}/api/log-usage`.
///
/// The response is not part of the contract: any status counts as delivered.
#[derive(Debug, Clone)]
pub struct HttpUsageSink {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpUsageSink {
    /// Create a sink for the log service at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, UsageError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Self::with_client(base_url, http)
    }

    /// Create a sink with a custom reqwest client.
    pub fn with_client(base_url: &str, http: reqwest::Client) -> Result<Self, UsageError> {
        let endpoint = Url::parse(&format!(
            "{}/api/log-usage",
            base_url.trim_end_matches('/')
        ))?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl UsageSink for HttpUsageSink {
    async fn record(&self, event: &UsageEvent) -> Result<(), UsageError> {
        let resp = self
            .http
            .post(self.endpoint.clone())
            .json(event)
            .send()
            .await?;

        if !resp.status().is_success() {
            tracing::debug!(
                status = %resp.status(),
                action = ?event.action,
                "Usage endpoint returned non-success status"
            );
        }
        Ok(())
    }
}
