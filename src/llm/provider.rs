//! Provider-specific URL and authentication handling.
//!
//! OpenAI-compatible providers mostly differ in where the chat endpoint
//! lives and which header carries the key.

/// Default Azure `OpenAI` API version.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-08-01-preview";

/// Supported LLM providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    /// `OpenAI` (api.openai.com)
    OpenAI,
    /// Azure `OpenAI` Service
    AzureOpenAI {
        /// Deployment name (required for Azure)
        deployment_name: String,
        /// API version (e.g., "2024-08-01-preview")
        api_version: String,
    },
    /// `OpenRouter` (openrouter.ai)
    OpenRouter,
    /// Groq (groq.com)
    Groq,
    /// Generic OpenAI-compatible provider (Ollama, LM Studio, vLLM, ...)
    Generic,
}

/// How the API key is attached to outbound requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPlacement {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `api-key: <key>` (Azure)
    ApiKeyHeader,
}

impl Provider {
    /// Detect provider from base URL.
    ///
    /// ```rust
    /// use korean_tutor_chat::llm::Provider;
    ///
    /// assert_eq!(Provider::detect_from_url("https://api.openai.com"), Provider::OpenAI);
    /// ```
    #[must_use]
    pub fn detect_from_url(base_url: &str) -> Self {
        let lower = base_url.to_lowercase();

        if lower.contains("openai.azure.com") || lower.contains("azure.com") {
            Self::AzureOpenAI {
                deployment_name: String::new(),
                api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            }
        } else if lower.contains("openrouter.ai") {
            Self::OpenRouter
        } else if lower.contains("groq.com") {
            Self::Groq
        } else if lower.contains("openai.com") {
            Self::OpenAI
        } else {
            Self::Generic
        }
    }

    /// Fill in the Azure deployment when the provider is Azure.
    ///
    /// Other providers are returned unchanged.
    #[must_use]
    pub fn with_azure_deployment(self, deployment: Option<String>, version: Option<String>) -> Self {
        match (self, deployment) {
            (Self::AzureOpenAI { api_version, .. }, Some(deployment_name)) => Self::AzureOpenAI {
                deployment_name,
                api_version: version.unwrap_or(api_version),
            },
            (other, _) => other,
        }
    }

    /// Build the chat completions URL for this provider.
    #[must_use]
    pub fn build_chat_url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');

        match self {
            Self::AzureOpenAI {
                deployment_name,
                api_version,
            } => {
                format!(
                    "{base}/openai/deployments/{deployment_name}/chat/completions?api-version={api_version}"
                )
            }
            Self::OpenRouter => format!("{base}/api/v1/chat/completions"),
            Self::Groq => format!("{base}/openai/v1/chat/completions"),
            Self::OpenAI | Self::Generic => format!("{base}/v1/chat/completions"),
        }
    }

    /// Header used to carry the API key.
    #[must_use]
    pub fn key_placement(&self) -> KeyPlacement {
        match self {
            Self::AzureOpenAI { .. } => KeyPlacement::ApiKeyHeader,
            _ => KeyPlacement::Bearer,
        }
    }

    /// Whether the request body needs the `model` field.
    ///
    /// Azure selects the model through the deployment in the URL.
    #[must_use]
    pub fn sends_model_in_body(&self) -> bool {
        !matches!(self, Self::AzureOpenAI { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_openai() {
        assert_eq!(
            Provider::detect_from_url("https://api.openai.com"),
            Provider::OpenAI
        );
    }

    #[test]
    fn test_detect_azure() {
        let provider = Provider::detect_from_url("https://my-resource.openai.azure.com");
        assert!(matches!(provider, Provider::AzureOpenAI { .. }));
        assert_eq!(provider.key_placement(), KeyPlacement::ApiKeyHeader);
        assert!(!provider.sends_model_in_body());
    }

    #[test]
    fn test_detect_local_is_generic() {
        let provider = Provider::detect_from_url("http://localhost:11434");
        assert_eq!(provider, Provider::Generic);
        assert_eq!(provider.key_placement(), KeyPlacement::Bearer);
    }

    #[test]
    fn test_build_url_openai_trims_slash() {
        let url = Provider::OpenAI.build_chat_url("https://api.openai.com/");
        assert_eq!(url, "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_build_url_groq() {
        let url = Provider::Groq.build_chat_url("https://api.groq.com");
        assert_eq!(url, "https://api.groq.com/openai/v1/chat/completions");
    }

    #[test]
    fn test_azure_deployment_override() {
        let provider = Provider::detect_from_url("https://my-resource.openai.azure.com")
            .with_azure_deployment(Some("tutor".to_string()), None);
        let url = provider.build_chat_url("https://my-resource.openai.azure.com");
        assert_eq!(
            url,
            "https://my-resource.openai.azure.com/openai/deployments/tutor/chat/completions?api-version=2024-08-01-preview"
        );
    }

    #[test]
    fn test_deployment_ignored_for_other_providers() {
        let provider = Provider::OpenAI.with_azure_deployment(Some("x".to_string()), None);
        assert_eq!(provider, Provider::OpenAI);
    }
}
