//! Email/password sign-in.
//!
//! Authentication is delegated to Supabase GoTrue. Locally we only validate
//! the form and pass the provider's error message through untouched.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// Minimum password length accepted by the form.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Form field a validation error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Email,
    Password,
}

/// A rejected form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: Field,
    pub message: String,
}

/// Sign-in errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The form did not pass local validation.
    #[error("{}", .0.first().map_or("invalid input", |e| e.message.as_str()))]
    Validation(Vec<FieldError>),

    /// The provider refused the credentials. The message is the provider's own.
    #[error("{0}")]
    Provider(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid provider URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Credentials submitted by the login form.
#[derive(Clone, Serialize, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for SignInRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignInRequest")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl SignInRequest {
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Check the form before contacting the provider.
    pub fn validate(&self) -> Result<(), AuthError> {
        let mut errors = Vec::new();
        if !is_valid_email(&self.email) {
            errors.push(FieldError {
                field: Field::Email,
                message: "Invalid email".to_string(),
            });
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            errors.push(FieldError {
                field: Field::Password,
                message: format!("String must contain at least {MIN_PASSWORD_LEN} character(s)"),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AuthError::Validation(errors))
        }
    }
}

/// The web form's email rule. Dots in the local part may not lead, trail or
/// repeat; the top-level domain is at least two letters.
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:[a-z0-9_'+\-]+\.)*[a-z0-9_'+\-]*[a-z0-9_+\-]@(?:[a-z0-9][a-z0-9\-]*\.)+[a-z]{2,}$",
    )
    .expect("email pattern is valid")
});

fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Session returned by a successful sign-in.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    pub user: AuthUser,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("user", &self.user)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Something that can sign a user in with email and password.
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in_with_password(&self, req: &SignInRequest) -> Result<AuthSession, AuthError>;
}

/// Supabase GoTrue password grant.
#[derive(Clone)]
pub struct SupabaseAuth {
    http: reqwest::Client,
    token_url: Url,
    anon_key: String,
}

impl std::fmt::Debug for SupabaseAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseAuth")
            .field("token_url", &self.token_url.as_str())
            .finish_non_exhaustive()
    }
}

impl SupabaseAuth {
    pub fn new(project_url: &str, anon_key: impl Into<String>) -> Result<Self, AuthError> {
        Self::with_client(project_url, anon_key, reqwest::Client::new())
    }

    pub fn with_client(
        project_url: &str,
        anon_key: impl Into<String>,
        http: reqwest::Client,
    ) -> Result<Self, AuthError> {
        let token_url = Url::parse(&format!(
            "{}/auth/v1/token?grant_type=password",
            project_url.trim_end_matches('/')
        ))?;
        Ok(Self {
            http,
            token_url,
            anon_key: anon_key.into(),
        })
    }
}

#[async_trait::async_trait]
impl AuthProvider for SupabaseAuth {
    async fn sign_in_with_password(&self, req: &SignInRequest) -> Result<AuthSession, AuthError> {
        let resp = self
            .http
            .post(self.token_url.clone())
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .json(req)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<AuthSession>().await?);
        }

        let body: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
        let message = provider_error_message(&body)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Sign-in failed").to_string());

        tracing::info!(status = %status, email = %req.email, "Sign-in rejected");
        Err(AuthError::Provider(message))
    }
}

/// Pick the human-readable message out of a GoTrue error body.
fn provider_error_message(body: &serde_json::Value) -> Option<String> {
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(|v| v.as_str()))
        .map(ToString::to_string)
}

/// State behind the login form.
pub struct LoginForm {
    provider: Arc<dyn AuthProvider>,
    loading: bool,
    error: Option<String>,
    field_errors: Vec<FieldError>,
    session: Option<AuthSession>,
}

impl std::fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginForm")
            .field("loading", &self.loading)
            .field("error", &self.error)
            .field("field_errors", &self.field_errors)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl LoginForm {
    #[must_use]
    pub fn new(provider: Arc<dyn AuthProvider>) -> Self {
        Self {
            provider,
            loading: false,
            error: None,
            field_errors: Vec::new(),
            session: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Provider error from the last attempt, verbatim.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn field_error(&self, field: Field) -> Option<&str> {
        self.field_errors
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    pub fn session(&self) -> Option<&AuthSession> {
        self.session.as_ref()
    }

    /// Validate and sign in. Returns `true` on success.
    pub async fn submit(&mut self, email: &str, password: &str) -> bool {
        let req = SignInRequest::new(email, password);
        self.field_errors.clear();
        self.error = None;

        if let Err(AuthError::Validation(errors)) = req.validate() {
            self.field_errors = errors;
            return false;
        }

        self.loading = true;
        let result = self.provider.sign_in_with_password(&req).await;
        self.loading = false;

        match result {
            Ok(session) => {
                self.session = Some(session);
                true
            }
            Err(e) => {
                self.error = Some(e.to_string());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Refuse(&'static str);

    #[async_trait::async_trait]
    impl AuthProvider for Refuse {
        async fn sign_in_with_password(
            &self,
            _req: &SignInRequest,
        ) -> Result<AuthSession, AuthError> {
            Err(AuthError::Provider(self.0.to_string()))
        }
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("student@school.kr"));
        assert!(is_valid_email("a.b+c@mail.example.com"));
        assert!(!is_valid_email("student"));
        assert!(!is_valid_email("@school.kr"));
        assert!(!is_valid_email("student@school"));
        assert!(!is_valid_email("stu dent@school.kr"));
        assert!(!is_valid_email("student@@school.kr"));
        assert!(!is_valid_email("student@school..kr"));
    }

    #[test]
    fn test_email_edge_cases_rejected() {
        for email in ["a@b.c", ".a@b.com", "a.@b.com", "a@-b.com", "a@b.123", "a..b@c.com"] {
            let err = SignInRequest::new(email, "secret1").validate().unwrap_err();
            let AuthError::Validation(errors) = err else {
                panic!("expected validation error for {email}");
            };
            assert_eq!(errors.len(), 1, "{email}");
            assert_eq!(errors[0].field, Field::Email);
            assert_eq!(errors[0].message, "Invalid email", "{email}");
        }
    }

    #[test]
    fn test_email_accepted_forms() {
        for email in [
            "a@bc.kr",
            "o'neil@school.co.kr",
            "first.last+tag@mail-1.example.com",
            "STUDENT@SCHOOL.KR",
        ] {
            assert!(SignInRequest::new(email, "secret1").validate().is_ok(), "{email}");
        }
    }

    #[test]
    fn test_validation_collects_both_fields() {
        let err = SignInRequest::new("nope", "123").validate().unwrap_err();
        let AuthError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, Field::Email);
        assert_eq!(errors[1].field, Field::Password);
    }

    #[test]
    fn test_password_length_counts_chars() {
        assert!(SignInRequest::new("a@b.co", "비밀번호다섯").validate().is_ok());
    }

    #[test]
    fn test_provider_message_priority() {
        let body = serde_json::json!({
            "error": "invalid_grant",
            "error_description": "Invalid login credentials"
        });
        assert_eq!(
            provider_error_message(&body).as_deref(),
            Some("Invalid login credentials")
        );
        let body = serde_json::json!({ "code": 400, "msg": "Email not confirmed" });
        assert_eq!(
            provider_error_message(&body).as_deref(),
            Some("Email not confirmed")
        );
        assert_eq!(provider_error_message(&serde_json::Value::Null), None);
    }

    #[tokio::test]
    async fn test_form_shows_provider_error_verbatim() {
        let mut form = LoginForm::new(Arc::new(Refuse("Invalid login credentials")));
        assert!(!form.submit("student@school.kr", "password1").await);
        assert_eq!(form.error(), Some("Invalid login credentials"));
        assert!(!form.is_loading());
        assert!(form.session().is_none());
    }

    #[tokio::test]
    async fn test_form_validation_skips_provider() {
        let mut form = LoginForm::new(Arc::new(Refuse("should not be called")));
        assert!(!form.submit("bad", "pw").await);
        assert_eq!(form.error(), None);
        assert_eq!(form.field_error(Field::Email), Some("Invalid email"));
        assert_eq!(
            form.field_error(Field::Password),
            Some("String must contain at least 6 character(s)")
        );
    }
}
