//! Normalized event types for streaming tutor replies.
//!
//! Every hop of a chat turn speaks the same event model: the LLM driver
//! emits [`NormalizedEvent`]s, the server frames them as Server-Sent Events,
//! and the HTTP transport parses the frames back into the same enum before
//! they reach the chat session.
//!
//! # Example
//!
//! ```rust
//! use korean_tutor_chat::normalized::{NormalizedEvent, sse_event};
//!
//! let event = NormalizedEvent::MessageDelta {
//!     text: "안녕하세요".to_string(),
//! };
//! let sse = sse_event(&event);
//! assert!(sse.contains("message.delta"));
//! ```

use serde::{Deserialize, Serialize};

/// Normalized streaming events for a single assistant reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum NormalizedEvent {
    /// Indicates the start of a new streaming response.
    #[serde(rename = "stream.start")]
    StreamStart {
        /// Unique identifier for this request/response pair.
        request_id: String,
    },

    /// Incremental text delta from the assistant's response.
    #[serde(rename = "message.delta")]
    MessageDelta {
        /// The text fragment to append.
        text: String,
    },

    /// An error occurred during streaming.
    #[serde(rename = "error")]
    Error {
        /// Error message.
        message: String,
        /// Optional error code for programmatic handling.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// Stream has completed successfully.
    #[serde(rename = "done")]
    Done,
}

impl NormalizedEvent {
    /// Whether this event ends the stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done)
    }
}

/// Convert a [`NormalizedEvent`] to an SSE-formatted string.
///
/// The output carries an `event:` line (for `EventSource` listeners) and a
/// `data:` line containing the JSON payload.
///
/// ```rust
/// use korean_tutor_chat::normalized::{NormalizedEvent, sse_event};
///
/// let sse = sse_event(&NormalizedEvent::Done);
/// assert!(sse.contains("event: done"));
/// ```
pub fn sse_event(evt: &NormalizedEvent) -> String {
    let json = serde_json::to_string(evt).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "data": { "message": e.to_string() } }).to_string()
    });

    let event_name = event_name(evt);

    format!("event: {event_name}\ndata: {json}\n\n")
}

/// Get the SSE event name for a [`NormalizedEvent`].
pub fn event_name(evt: &NormalizedEvent) -> &'static str {
    match evt {
        NormalizedEvent::StreamStart { .. } => "stream.start",
        NormalizedEvent::MessageDelta { .. } => "message.delta",
        NormalizedEvent::Error { .. } => "error",
        NormalizedEvent::Done => "done",
    }
}

/// Parse one SSE frame (the text between blank lines) into an event.
///
/// Only `data:` lines are considered; multiple data lines are joined with
/// newlines as `EventSource` does. Frames without data (comments, keep-alives)
/// yield `Ok(None)`.
pub fn parse_sse_frame(frame: &str) -> Result<Option<NormalizedEvent>, serde_json::Error> {
    let data: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .collect();

    if data.is_empty() {
        return Ok(None);
    }

    serde_json::from_str(&data.join("\n")).map(Some)
}

/// Find the position of a double newline in the buffer.
pub(crate) fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_delta_serialization() {
        let event = NormalizedEvent::MessageDelta {
            text: "Hello".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("message.delta"));
        assert!(json.contains("Hello"));
    }

    #[test]
    fn test_sse_event_format() {
        let event = NormalizedEvent::Done;
        let sse = sse_event(&event);
        assert!(sse.starts_with("event: done\n"));
        assert!(sse.contains("data: "));
        assert!(sse.ends_with("\n\n"));
    }

    #[test]
    fn test_parse_frame_reads_data_line() {
        let sse = sse_event(&NormalizedEvent::MessageDelta {
            text: "반가워요".to_string(),
        });
        let parsed = parse_sse_frame(sse.trim_end()).unwrap();
        assert_eq!(
            parsed,
            Some(NormalizedEvent::MessageDelta {
                text: "반가워요".to_string()
            })
        );
    }

    #[test]
    fn test_parse_frame_without_data_is_skipped() {
        assert_eq!(parse_sse_frame(": keep-alive").unwrap(), None);
        assert_eq!(parse_sse_frame("event: ping").unwrap(), None);
    }

    #[test]
    fn test_parse_frame_rejects_garbage() {
        assert!(parse_sse_frame("data: {not json").is_err());
    }

    #[test]
    fn test_terminal_events() {
        assert!(NormalizedEvent::Done.is_terminal());
        assert!(
            NormalizedEvent::Error {
                message: "boom".into(),
                code: None
            }
            .is_terminal()
        );
        assert!(!NormalizedEvent::MessageDelta { text: "x".into() }.is_terminal());
    }

    #[test]
    fn test_find_double_newline() {
        assert_eq!(find_double_newline(b"data: x\n\nrest"), Some(7));
        assert_eq!(find_double_newline(b"data: x\n"), None);
    }
}
