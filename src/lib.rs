//! Korean Tutor Chat
//!
//! A Korean language-school chat assistant: students ask questions in a chat
//! window and a tutor persona streams answers back. Every sent and received
//! message is reported, best-effort, to the school's usage log.
//!
//! # Architecture
//!
//! - **Chat session**: view-model owning messages, input, status and
//!   suggested topics; drives a streaming transport
//! - **Server**: Axum HTTP server streaming tutor replies over SSE
//! - **LLM**: OpenAI-compatible Chat Completions driver
//! - **Side channels**: usage logging, `PostHog` analytics, Supabase sign-in
//!
//! # Modules
//!
//! - [`chat`]: Chat session view-model and transports
//! - [`usage`]: Fire-and-forget usage logging
//! - [`credentials`]: Student token sources
//! - [`faq`]: Suggested learning topics
//! - [`analytics`]: `PostHog` capture client
//! - [`auth`]: Email/password sign-in
//! - [`llm`]: LLM driver trait and implementations
//! - [`normalized`]: Streaming event model shared by server and client

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::unused_async)]
#![allow(clippy::collapsible_if)]

pub mod analytics;
pub mod auth;
pub mod chat;
pub mod config;
pub mod credentials;
pub mod faq;
pub mod llm;
pub mod normalized;
pub mod rate_limit;
pub mod server;
pub mod telemetry;
pub mod usage;

use std::sync::Arc;

use crate::analytics::AnalyticsClient;
use crate::auth::AuthProvider;
use crate::config::AppConfig;
use crate::faq::FaqCatalog;
use crate::llm::LlmDriver;
use crate::rate_limit::TokenBucket;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Driver producing tutor replies.
    pub driver: Arc<dyn LlmDriver>,
    /// Suggested topics served to clients.
    pub faq: FaqCatalog,
    /// Sign-in provider, when configured.
    pub auth: Option<Arc<dyn AuthProvider>>,
    /// Analytics client, when configured.
    pub analytics: Option<Arc<AnalyticsClient>>,
    /// Global Rate Limiter
    pub rate_limiter: Arc<TokenBucket>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("faq", &self.faq)
            .field("auth", &self.auth.is_some())
            .field("analytics", &self.analytics.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// State with no auth and no analytics.
    pub fn new(driver: Arc<dyn LlmDriver>, config: Arc<AppConfig>) -> Self {
        let rate_limiter = Arc::new(TokenBucket::new(
            config.resilience.requests_per_second,
            config.resilience.burst_size,
        ));
        Self {
            driver,
            faq: FaqCatalog::korean_learning(),
            auth: None,
            analytics: None,
            rate_limiter,
            config,
        }
    }

    #[must_use]
    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    #[must_use]
    pub fn with_analytics(mut self, analytics: Arc<AnalyticsClient>) -> Self {
        self.analytics = Some(analytics);
        self
    }
}
