//! Best-effort usage logging.
//!
//! Every message a student sends and every reply they receive is reported
//! to the school's usage log. Reporting is fire-and-forget: the
//! [`UsageLogger`] spawns the delivery and drops the outcome, so a slow or
//! failing log endpoint never reaches the chat.
//!
//! # Architecture
//!
//! - [`UsageEvent`]: the JSON body of a usage record
//! - [`UsageSink`]: where records are delivered
//! - [`HttpUsageSink`]: `POST {base}/api/log-usage`
//! - [`UsageLogger`]: cloneable handle that dispatches without waiting

mod http;

pub use http::HttpUsageSink;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::credentials::StudentToken;

/// Application name reported with every record.
pub const SOURCE_APP: &str = "chat";

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageAction {
    MessageSent,
    MessageReceived,
}

/// Free-form details of a usage record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDetails {
    pub message: String,
}

/// One usage record.
///
/// `student_token` is left out of the JSON entirely when no student is
/// known; the endpoint accepts anonymous records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_token: Option<StudentToken>,
    pub action: UsageAction,
    pub source_app: String,
    pub details: UsageDetails,
}

impl UsageEvent {
    #[must_use]
    pub fn new(
        action: UsageAction,
        student_token: Option<StudentToken>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            student_token,
            action,
            source_app: SOURCE_APP.to_string(),
            details: UsageDetails {
                message: message.into(),
            },
        }
    }
}

/// Usage delivery errors. Never shown to the student.
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid endpoint URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Destination for usage records.
#[async_trait::async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, event: &UsageEvent) -> Result<(), UsageError>;
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait::async_trait]
impl UsageSink for NoopSink {
    async fn record(&self, _event: &UsageEvent) -> Result<(), UsageError> {
        Ok(())
    }
}

/// Cloneable, non-blocking front for a [`UsageSink`].
#[derive(Clone)]
pub struct UsageLogger {
    sink: Arc<dyn UsageSink>,
    enabled: bool,
}

impl std::fmt::Debug for UsageLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageLogger")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl UsageLogger {
    #[must_use]
    pub fn new(sink: Arc<dyn UsageSink>) -> Self {
        Self {
            sink,
            enabled: true,
        }
    }

    /// Logger that records nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            sink: Arc::new(NoopSink),
            enabled: false,
        }
    }

    /// HTTP logger when a base URL is configured, disabled otherwise.
    pub fn from_base_url(
        base_url: Option<&str>,
        timeout: std::time::Duration,
    ) -> Result<Self, UsageError> {
        match base_url.map(str::trim).filter(|s| !s.is_empty()) {
            Some(base) => Ok(Self::new(Arc::new(HttpUsageSink::new(base, timeout)?))),
            None => Ok(Self::disabled()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Deliver a record in the background and forget about it.
    ///
    /// Failures are traced at debug level. Outside a tokio runtime the record
    /// is dropped.
    pub fn dispatch(&self, action: UsageAction, token: Option<StudentToken>, message: &str) {
        if !self.enabled {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(?action, "No runtime; usage record dropped");
            return;
        };

        let event = UsageEvent::new(action, token, message);
        let sink = Arc::clone(&self.sink);
        handle.spawn(async move {
            if let Err(e) = sink.record(&event).await {
                tracing::debug!(action = ?event.action, error = %e, "Usage record not delivered");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_shape() {
        let event = UsageEvent::new(
            UsageAction::MessageSent,
            Some(StudentToken::new("tok")),
            "안녕하세요",
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "student_token": "tok",
                "action": "message_sent",
                "source_app": "chat",
                "details": { "message": "안녕하세요" }
            })
        );
    }

    #[test]
    fn test_missing_token_is_omitted() {
        let event = UsageEvent::new(UsageAction::MessageReceived, None, "reply");
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("student_token").is_none());
        assert_eq!(json["action"], "message_received");
    }

    #[test]
    fn test_dispatch_without_runtime_does_not_panic() {
        let logger = UsageLogger::new(Arc::new(NoopSink));
        logger.dispatch(UsageAction::MessageSent, None, "x");
    }

    #[test]
    fn test_blank_base_url_disables() {
        let logger =
            UsageLogger::from_base_url(Some("  "), std::time::Duration::from_secs(1)).unwrap();
        assert!(!logger.is_enabled());
    }
}
