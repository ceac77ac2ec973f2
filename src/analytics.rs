//! Product analytics (`PostHog`).
//!
//! [`AnalyticsClient`] is created explicitly from configuration and shut
//! down explicitly, so nothing is captured by merely loading the crate.
//! Capturing never blocks the caller: events go into a bounded queue that a
//! single worker drains into `PostHog`'s `/capture/` endpoint. A full queue
//! or a failed delivery drops the event.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default ingestion host.
pub const DEFAULT_POSTHOG_HOST: &str = "https://us.i.posthog.com";

/// Distinct id used when no student is known.
pub const ANONYMOUS_DISTINCT_ID: &str = "anonymous";

/// When `PostHog` should build person profiles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonProfiles {
    /// Only for identified users; anonymous events skip profile processing.
    #[default]
    IdentifiedOnly,
    Always,
}

/// Analytics settings.
#[derive(Debug, Clone)]
pub struct AnalyticsSettings {
    pub api_key: String,
    pub host: String,
    pub person_profiles: PersonProfiles,
    pub queue_capacity: usize,
    pub request_timeout: Duration,
}

impl AnalyticsSettings {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            host: DEFAULT_POSTHOG_HOST.to_string(),
            person_profiles: PersonProfiles::default(),
            queue_capacity: 256,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Analytics errors. Logged, never surfaced.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[derive(Debug, Serialize)]
struct CaptureBody {
    api_key: String,
    event: String,
    distinct_id: String,
    properties: Map<String, Value>,
    timestamp: DateTime<Utc>,
}

/// Handle for capturing analytics events.
#[derive(Debug)]
pub struct AnalyticsClient {
    tx: mpsc::Sender<CaptureBody>,
    worker: JoinHandle<()>,
    api_key: String,
    person_profiles: PersonProfiles,
}

impl AnalyticsClient {
    /// Start the client, or return `Ok(None)` when no project key is set.
    ///
    /// Must be called inside a tokio runtime.
    pub fn init(settings: Option<AnalyticsSettings>) -> Result<Option<Self>, AnalyticsError> {
        let Some(settings) = settings.filter(|s| !s.api_key.trim().is_empty()) else {
            tracing::info!("Analytics disabled (no project key)");
            return Ok(None);
        };

        let endpoint = url::Url::parse(&format!(
            "{}/capture/",
            settings.host.trim_end_matches('/')
        ))?;
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;

        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let worker = tokio::spawn(run_worker(http, endpoint, rx));

        tracing::info!(host = %settings.host, "Analytics enabled");

        Ok(Some(Self {
            tx,
            worker,
            api_key: settings.api_key,
            person_profiles: settings.person_profiles,
        }))
    }

    /// Queue an event. Drops it if the queue is full.
    pub fn capture(
        &self,
        distinct_id: Option<&str>,
        event: &str,
        mut properties: Map<String, Value>,
    ) {
        let identified = distinct_id.is_some_and(|id| !id.is_empty());
        if !identified && self.person_profiles == PersonProfiles::IdentifiedOnly {
            properties.insert("$process_person_profile".to_string(), Value::Bool(false));
        }

        let body = CaptureBody {
            api_key: self.api_key.clone(),
            event: event.to_string(),
            distinct_id: distinct_id
                .filter(|id| !id.is_empty())
                .unwrap_or(ANONYMOUS_DISTINCT_ID)
                .to_string(),
            properties,
            timestamp: Utc::now(),
        };

        if let Err(e) = self.tx.try_send(body) {
            tracing::debug!(event, error = %e, "Analytics event dropped");
        }
    }

    /// Stop accepting events and wait until queued ones are delivered.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            tracing::warn!(error = %e, "Analytics worker ended abnormally");
        }
    }
}

async fn run_worker(
    http: reqwest::Client,
    endpoint: url::Url,
    mut rx: mpsc::Receiver<CaptureBody>,
) {
    while let Some(body) = rx.recv().await {
        let result = http
            .post(endpoint.clone())
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        if let Err(e) = result {
            tracing::debug!(event = %body.event, error = %e, "Analytics capture failed");
        }
    }
    tracing::debug!("Analytics worker drained");
}
