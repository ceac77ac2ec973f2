//! Submission status of a chat session.

use serde::{Deserialize, Serialize};

/// Where the session is in its request/response cycle.
///
/// Cycles `Ready → Submitted → Streaming → Ready`, or ends in `Error` when
/// the exchange fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Ready,
    /// Sent, waiting for the first byte of the reply.
    Submitted,
    /// Reply is arriving.
    Streaming,
    /// The last exchange failed. The composer is usable again.
    Error,
}

impl SessionStatus {
    /// A reply is in flight.
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Submitted | Self::Streaming)
    }

    /// The composer is enabled.
    #[must_use]
    pub fn accepts_input(self) -> bool {
        !self.is_busy()
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Submitted => "submitted",
            Self::Streaming => "streaming",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_states() {
        assert!(!SessionStatus::Ready.is_busy());
        assert!(SessionStatus::Submitted.is_busy());
        assert!(SessionStatus::Streaming.is_busy());
        assert!(SessionStatus::Error.accepts_input());
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Streaming).unwrap(),
            "\"streaming\""
        );
        assert_eq!(SessionStatus::Submitted.to_string(), "submitted");
    }
}
