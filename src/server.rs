use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::analytics::AnalyticsClient;
use crate::auth::{AuthError, SignInRequest, SupabaseAuth};
use crate::chat::{Message, Role};
use crate::config::AppConfig;
use crate::credentials::token_from_cookie_header;
use crate::faq::{FaqCatalog, FaqTopic};
use crate::llm::{ChatCompletionsDriver, LlmSettings, prompt};
use crate::normalized::{NormalizedEvent, sse_event};
use crate::rate_limit::rate_limit_middleware;

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>, settings: LlmSettings) -> anyhow::Result<()> {
    info!(
        name: "llm.config.loaded",
        base_url = %settings.base_url,
        model = %settings.model,
        "LLM configuration loaded"
    );

    let driver = Arc::new(ChatCompletionsDriver::new(settings));
    let mut state = AppState::new(driver, Arc::clone(&config));

    match (&config.auth.supabase_url, &config.auth.supabase_anon_key) {
        (Some(url), Some(key)) => {
            state = state.with_auth(Arc::new(SupabaseAuth::new(url, key.as_str())?));
            info!("Supabase sign-in enabled");
        }
        _ => info!("Sign-in disabled (SUPABASE_URL / SUPABASE_ANON_KEY not set)"),
    }

    if let Some(analytics) = AnalyticsClient::init(config.analytics.settings())? {
        state = state.with_analytics(Arc::new(analytics));
    }
    let analytics = state.analytics.clone();

    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router and its state are gone; we should hold the last reference.
    if let Some(analytics) = analytics {
        match Arc::try_unwrap(analytics) {
            Ok(client) => client.shutdown().await,
            Err(_) => tracing::warn!("Analytics still shared at shutdown; queued events dropped"),
        }
    }

    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    // Timeouts are "disabled" with a very long duration so the layer stack
    // keeps one type.
    let timeout_duration = if state.config.resilience.timeout_disabled {
        Duration::from_secs(365 * 24 * 60 * 60)
    } else {
        Duration::from_secs(30)
    };

    let chat = Router::new()
        .route("/api/chat", post(api_chat))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(|| async { "ok" }))
        .route("/api/faq", get(api_faq))
        .route("/api/auth/login", post(api_login))
        .merge(chat)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(1024 * 1024))
                .layer(axum::middleware::from_fn(
                    move |req: Request, next: Next| async move {
                        match tokio::time::timeout(timeout_duration, next.run(req)).await {
                            Ok(res) => res,
                            Err(_) => {
                                (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response()
                            }
                        }
                    },
                )),
        )
        .with_state(state)
}

fn student_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(token_from_cookie_header)
        .map(|t| t.as_str().to_string())
}

fn capture(state: &AppState, headers: &HeaderMap, event: &str, properties: serde_json::Value) {
    let Some(analytics) = &state.analytics else {
        return;
    };
    let properties = match properties {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    analytics.capture(student_token(headers).as_deref(), event, properties);
}

// ─────────────────────────────────────────────────────────────────────────────
// HTML Page Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Generate the HTML shell for the application.
fn html_shell(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="ko">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="description" content="한국어 어학원 선생님 도우미">
    <title>{title}</title>
    <link rel="icon" href="/favicon.svg">
</head>
<body>
    <header>
        <h1>한국어 어학원</h1>
        <p>한국어 선생님 도우미</p>
    </header>
    <main id="app">
        {content}
    </main>
    <footer>
        <p>한국어 어학원 선생님 도우미</p>
    </footer>
</body>
</html>"#
    )
}

/// Welcome card and suggested topics.
fn chat_content(catalog: &FaqCatalog) -> String {
    let topics: String = catalog
        .topics()
        .iter()
        .map(|t| {
            format!(
                r#"
            <li data-topic="{id}"><span class="badge">{category}</span> {question}</li>"#,
                id = t.id,
                category = t.category,
                question = t.question,
            )
        })
        .collect();

    format!(
        r#"
    <section class="welcome">
        <h2>한국어 어학원 도우미</h2>
        <p>안녕하세요! 👋</p>
        <p>한국어 공부를 도와드릴게요!</p>
        <nav>
            <a href="/legal/privacy">개인정보처리방침</a>
            <a href="/legal/terms">이용약관</a>
        </nav>
        <p>언제든지 질문하세요!</p>
    </section>
    <section class="faq">
        <p>한국어 학습 도움</p>
        <ul>{topics}
        </ul>
    </section>
    "#
    )
}

/// Index page handler.
async fn index_handler(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    capture(&state, &headers, "$pageview", serde_json::json!({ "$current_url": "/" }));
    Html(html_shell("한국어 어학원", &chat_content(&state.faq)))
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for chat API.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    /// Visible conversation, oldest first.
    messages: Vec<Message>,
}

/// POST /api/chat - Stream the tutor's reply as SSE.
async fn api_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Response, (StatusCode, String)> {
    match req.messages.last() {
        Some(last) if last.role == Role::User => {}
        Some(_) => {
            return Err((
                StatusCode::BAD_REQUEST,
                "Last message must be from the user".to_string(),
            ));
        }
        None => return Err((StatusCode::BAD_REQUEST, "No messages".to_string())),
    }

    let request_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(
        request_id = %request_id,
        message_count = req.messages.len(),
        "Received chat request"
    );
    capture(
        &state,
        &headers,
        "chat_request",
        serde_json::json!({ "message_count": req.messages.len() }),
    );

    let llm_request = prompt::build_request(&req.messages);
    let driver = Arc::clone(&state.driver);

    let sse_stream = async_stream::stream! {
        yield Ok::<String, std::convert::Infallible>(sse_event(&NormalizedEvent::StreamStart {
            request_id: request_id.clone(),
        }));

        let stream = match driver.stream(llm_request).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(
                    request_id = %request_id,
                    error = %e,
                    "Failed to start completion"
                );
                let err = NormalizedEvent::Error {
                    message: e.to_string(),
                    code: None,
                };
                yield Ok(sse_event(&err));
                yield Ok(sse_event(&NormalizedEvent::Done));
                return;
            }
        };

        let mut reply_len = 0usize;
        futures::pin_mut!(stream);
        while let Some(item) = stream.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    tracing::error!(request_id = %request_id, error = %e, "Completion stream failed");
                    NormalizedEvent::Error { message: e.to_string(), code: None }
                }
            };

            if let NormalizedEvent::MessageDelta { text } = &event {
                reply_len += text.len();
            }
            let terminal = event.is_terminal();
            yield Ok(sse_event(&event));
            if terminal {
                break;
            }
        }

        tracing::info!(request_id = %request_id, reply_len, "Stream complete");
    };

    let body = axum::body::Body::from_stream(sse_stream);
    Ok(build_sse_response(body))
}

/// GET /api/faq - Suggested topics.
async fn api_faq(State(state): State<AppState>) -> Json<&'static [FaqTopic]> {
    Json(state.faq.topics())
}

/// POST /api/auth/login - Email/password sign-in.
async fn api_login(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> Response {
    let Some(auth) = &state.auth else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "Sign-in is not configured" })),
        )
            .into_response();
    };

    if let Err(AuthError::Validation(errors)) = req.validate() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "errors": errors })),
        )
            .into_response();
    }

    match auth.sign_in_with_password(&req).await {
        Ok(session) => {
            info!(user_id = %session.user.id, "Student signed in");
            Json(session).into_response()
        }
        Err(AuthError::Provider(message)) => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": message })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Sign-in provider unreachable");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn build_sse_response(body: axum::body::Body) -> Response {
    let mut resp = Response::new(body);
    let h = resp.headers_mut();
    h.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/event-stream"),
    );
    h.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache"),
    );
    h.insert(
        header::CONNECTION,
        header::HeaderValue::from_static("keep-alive"),
    );
    h.insert(
        "X-Accel-Buffering",
        header::HeaderValue::from_static("no"),
    );
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_student_token_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            header::HeaderValue::from_static("lang=ko; student_token=s-42"),
        );
        assert_eq!(student_token(&headers).as_deref(), Some("s-42"));
        assert_eq!(student_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_chat_content_lists_topics() {
        let html = chat_content(&FaqCatalog::korean_learning());
        assert!(html.contains("한국 문화가 궁금해요"));
        assert!(html.contains(r#"data-topic="pronunciation""#));
    }
}
