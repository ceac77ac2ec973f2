//! Tutor persona and request assembly.

use crate::chat::{Message, Role};

use super::{LlmRequest, MessageRole, PromptMessage};

/// System prompt for the Korean language-school assistant.
pub const TUTOR_SYSTEM_PROMPT: &str = "당신은 한국어 어학원의 친절한 한국어 선생님 도우미입니다. \
학생의 질문에 한국어로 답하고, 필요하면 쉬운 예문과 짧은 설명을 덧붙이세요. \
문법, 발음, 일상 회화, 한국 문화에 대한 질문을 환영합니다. \
학생이 다른 언어로 질문하면 그 언어로 짧게 설명한 뒤 한국어 표현을 함께 알려 주세요.";

/// Build a driver request from the visible conversation.
///
/// The tutor prompt always comes first; blank messages (an assistant reply
/// that failed before its first delta, for instance) are skipped.
#[must_use]
pub fn build_request(history: &[Message]) -> LlmRequest {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(PromptMessage::new(MessageRole::System, TUTOR_SYSTEM_PROMPT));

    messages.extend(
        history
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .map(|m| {
                let role = match m.role {
                    Role::User => MessageRole::User,
                    Role::Assistant => MessageRole::Assistant,
                };
                PromptMessage::new(role, m.content.clone())
            }),
    );

    LlmRequest { messages }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_first() {
        let history = vec![
            Message::user("안녕하세요"),
            Message::assistant("안녕하세요! 무엇을 도와드릴까요?"),
        ];
        let req = build_request(&history);
        assert_eq!(req.messages.len(), 3);
        assert_eq!(req.messages[0].role, MessageRole::System);
        assert_eq!(req.messages[1].role, MessageRole::User);
        assert_eq!(req.messages[2].role, MessageRole::Assistant);
    }

    #[test]
    fn test_blank_messages_skipped() {
        let history = vec![Message::user("질문"), Message::assistant("  ")];
        let req = build_request(&history);
        assert_eq!(req.messages.len(), 2);
    }
}
