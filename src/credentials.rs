//! Student credentials attached to usage events.
//!
//! The student token is issued by the school's own login flow and stored in
//! a `student_token` cookie. The chat never owns it: a [`CredentialSource`]
//! is asked for it each time an event is logged.

use std::fmt;
use std::sync::RwLock;

/// Name of the cookie holding the student token.
pub const STUDENT_TOKEN_COOKIE: &str = "student_token";

/// Opaque student identifier.
#[derive(Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct StudentToken(String);

impl StudentToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens end up in logs through Debug; keep them out.
impl fmt::Debug for StudentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StudentToken(..)")
    }
}

/// Supplies the current student token, if any.
pub trait CredentialSource: Send + Sync {
    fn student_token(&self) -> Option<StudentToken>;
}

/// No student is signed in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredential;

impl CredentialSource for NoCredential {
    fn student_token(&self) -> Option<StudentToken> {
        None
    }
}

/// A fixed token, e.g. from a command-line flag.
#[derive(Debug, Clone)]
pub struct StaticCredential(Option<StudentToken>);

impl StaticCredential {
    #[must_use]
    pub fn new(token: Option<StudentToken>) -> Self {
        Self(token)
    }
}

impl CredentialSource for StaticCredential {
    fn student_token(&self) -> Option<StudentToken> {
        self.0.clone()
    }
}

/// Reads the token from a `Cookie` header that can be swapped at runtime.
#[derive(Debug, Default)]
pub struct CookieCredential {
    header: RwLock<String>,
}

impl CookieCredential {
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: RwLock::new(header.into()),
        }
    }

    /// Replace the cookie header, e.g. after the login flow sets a new cookie.
    pub fn set_header(&self, header: impl Into<String>) {
        let mut guard = self
            .header
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = header.into();
    }
}

impl CredentialSource for CookieCredential {
    fn student_token(&self) -> Option<StudentToken> {
        let guard = self
            .header
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        token_from_cookie_header(&guard)
    }
}

/// Extract the `student_token` cookie from a `Cookie` header value.
///
/// Entries are `;`-separated `name=value` pairs. The value is everything
/// after the first `=`, so padded tokens survive. An empty value counts as
/// absent.
#[must_use]
pub fn token_from_cookie_header(header: &str) -> Option<StudentToken> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == STUDENT_TOKEN_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
        .map(StudentToken::new)
}
