//! Streaming chat transport.
//!
//! A transport takes the visible conversation and streams back the
//! assistant's reply as [`NormalizedEvent`]s. [`HttpChatTransport`] talks to
//! the `/api/chat` endpoint of a running server; [`DriverTransport`] calls an
//! [`LlmDriver`] in-process.

use std::sync::Arc;

use futures::StreamExt;
use url::Url;

use crate::llm::{EventStream, LlmDriver, prompt};
use crate::normalized::{NormalizedEvent, find_double_newline, parse_sse_frame};

use super::Message;

/// Sends a conversation and streams the reply.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// Stream the assistant reply to `history`.
    ///
    /// The last element of `history` is the message just submitted.
    async fn stream(&self, history: Vec<Message>) -> anyhow::Result<EventStream>;
}

/// Transport for the server's `POST /api/chat` SSE endpoint.
#[derive(Debug, Clone)]
pub struct HttpChatTransport {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpChatTransport {
    /// Create a transport for the server at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Create a transport with a custom reqwest client.
    pub fn with_client(base_url: &str, http: reqwest::Client) -> Result<Self, url::ParseError> {
        let endpoint = Url::parse(&format!("{}/api/chat", base_url.trim_end_matches('/')))?;
        Ok(Self { http, endpoint })
    }

    /// The chat endpoint this transport posts to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl ChatTransport for HttpChatTransport {
    async fn stream(&self, history: Vec<Message>) -> anyhow::Result<EventStream> {
        let body = serde_json::json!({ "messages": history });

        let resp = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let byte_stream = resp.bytes_stream();

        let out = async_stream::try_stream! {
            let mut buf = Vec::<u8>::new();

            futures::pin_mut!(byte_stream);
            'frames: while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk?;
                buf.extend_from_slice(&chunk);

                while let Some(pos) = find_double_newline(&buf) {
                    let frame = buf.drain(..pos + 2).collect::<Vec<_>>();
                    let text = String::from_utf8_lossy(&frame);

                    if let Some(event) = parse_sse_frame(&text)? {
                        let terminal = event.is_terminal();
                        yield event;
                        if terminal {
                            break 'frames;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(out))
    }
}

/// Transport that runs the tutor prompt through an in-process driver.
#[derive(Clone)]
pub struct DriverTransport {
    driver: Arc<dyn LlmDriver>,
}

impl std::fmt::Debug for DriverTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverTransport").finish_non_exhaustive()
    }
}

impl DriverTransport {
    #[must_use]
    pub fn new(driver: Arc<dyn LlmDriver>) -> Self {
        Self { driver }
    }
}

#[async_trait::async_trait]
impl ChatTransport for DriverTransport {
    async fn stream(&self, history: Vec<Message>) -> anyhow::Result<EventStream> {
        let request = prompt::build_request(&history);
        self.driver.stream(request).await
    }
}

/// Events the session applies while a turn is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The server accepted the request.
    Started,
    /// A fragment of the assistant's reply.
    Delta(String),
    /// The reply is complete.
    Finished,
    /// The exchange failed with the given message.
    Failed(String),
}

impl From<NormalizedEvent> for TransportEvent {
    fn from(event: NormalizedEvent) -> Self {
        match event {
            NormalizedEvent::StreamStart { .. } => Self::Started,
            NormalizedEvent::MessageDelta { text } => Self::Delta(text),
            NormalizedEvent::Error { message, .. } => Self::Failed(message),
            NormalizedEvent::Done => Self::Finished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_base() {
        let transport = HttpChatTransport::new("http://localhost:3000/").unwrap();
        assert_eq!(transport.endpoint().as_str(), "http://localhost:3000/api/chat");
    }

    #[test]
    fn test_invalid_base_rejected() {
        assert!(HttpChatTransport::new("not a url").is_err());
    }

    #[test]
    fn test_event_mapping() {
        assert_eq!(
            TransportEvent::from(NormalizedEvent::MessageDelta { text: "가".into() }),
            TransportEvent::Delta("가".into())
        );
        assert_eq!(
            TransportEvent::from(NormalizedEvent::Error {
                message: "rate limited".into(),
                code: Some("429".into())
            }),
            TransportEvent::Failed("rate limited".into())
        );
        assert_eq!(TransportEvent::from(NormalizedEvent::Done), TransportEvent::Finished);
    }
}
