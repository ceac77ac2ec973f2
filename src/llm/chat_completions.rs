//! OpenAI Chat Completions API driver.
//!
//! Implements [`LlmDriver`] for `/v1/chat/completions` with `stream: true`,
//! turning the provider's SSE chunks into [`NormalizedEvent`]s.

use futures::StreamExt;

use crate::normalized::{NormalizedEvent, find_double_newline};

use super::provider::KeyPlacement;
use super::{EventStream, LlmDriver, LlmRequest, LlmSettings};

/// Driver for the OpenAI Chat Completions API.
#[derive(Clone)]
pub struct ChatCompletionsDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsDriver")
            .field("base_url", &self.settings.base_url)
            .field("model", &self.settings.model)
            .field("provider", &self.settings.provider)
            .finish()
    }
}

impl ChatCompletionsDriver {
    /// Create a new Chat Completions driver with the given settings.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    fn request_body(&self, req: &LlmRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "stream": true,
            "messages": req.messages,
        });
        if self.settings.provider.sends_model_in_body() {
            body["model"] = serde_json::Value::String(self.settings.model.clone());
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmDriver for ChatCompletionsDriver {
    async fn stream(&self, req: LlmRequest) -> anyhow::Result<EventStream> {
        let url = self.settings.provider.build_chat_url(&self.settings.base_url);
        let body = self.request_body(&req);

        tracing::debug!(
            url = %url,
            message_count = req.messages.len(),
            "Sending chat completion request"
        );

        let mut rb = self.http.post(&url).json(&body);
        if let Some(k) = &self.settings.api_key {
            rb = match self.settings.provider.key_placement() {
                KeyPlacement::Bearer => rb.bearer_auth(k),
                KeyPlacement::ApiKeyHeader => rb.header("api-key", k),
            };
        }

        let resp = rb.send().await?.error_for_status()?;
        let byte_stream = resp.bytes_stream();

        let out = async_stream::try_stream! {
            let mut buf = Vec::<u8>::new();
            let mut finished = false;

            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk?;
                buf.extend_from_slice(&chunk);

                while let Some(pos) = find_double_newline(&buf) {
                    let frame = buf.drain(..pos + 2).collect::<Vec<_>>();
                    let text = String::from_utf8_lossy(&frame);

                    for line in text.lines() {
                        let line = line.trim();
                        let Some(data) = line.strip_prefix("data:") else {
                            continue;
                        };
                        let data = data.trim();

                        if data == "[DONE]" {
                            if !finished {
                                finished = true;
                                yield NormalizedEvent::Done;
                            }
                            continue;
                        }

                        let v: serde_json::Value = serde_json::from_str(data)?;

                        if let Some(message) = v.get("error").and_then(|e| e.get("message")).and_then(|m| m.as_str()) {
                            finished = true;
                            yield NormalizedEvent::Error {
                                message: message.to_string(),
                                code: v["error"].get("code").and_then(|c| c.as_str()).map(ToString::to_string),
                            };
                            continue;
                        }

                        // Some providers send a usage-only chunk with no choices.
                        let Some(choice) = v.get("choices").and_then(|c| c.get(0)) else {
                            continue;
                        };

                        if let Some(s) = choice["delta"].get("content").and_then(|x| x.as_str()) {
                            if !s.is_empty() {
                                yield NormalizedEvent::MessageDelta { text: s.to_string() };
                            }
                        }
                    }
                }
            }

            if !finished {
                yield NormalizedEvent::Done;
            }
        };

        Ok(Box::pin(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MessageRole, PromptMessage, Provider};

    fn settings(provider: Provider) -> LlmSettings {
        LlmSettings {
            base_url: "https://example.test".to_string(),
            api_key: None,
            model: "tutor-model".to_string(),
            provider,
        }
    }

    #[test]
    fn test_body_includes_model_for_openai() {
        let driver = ChatCompletionsDriver::new(settings(Provider::OpenAI));
        let body = driver.request_body(&LlmRequest {
            messages: vec![PromptMessage::new(MessageRole::User, "안녕")],
        });
        assert_eq!(body["model"], "tutor-model");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "안녕");
    }

    #[test]
    fn test_body_omits_model_for_azure() {
        let driver = ChatCompletionsDriver::new(settings(Provider::AzureOpenAI {
            deployment_name: "d".to_string(),
            api_version: "v".to_string(),
        }));
        let body = driver.request_body(&LlmRequest::default());
        assert!(body.get("model").is_none());
    }
}
