//! The chat session view-model.

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::credentials::{CredentialSource, NoCredential};
use crate::faq::FaqCatalog;
use crate::usage::{UsageAction, UsageLogger};

use super::scroll::{NoopViewport, ScrollAnchor, Viewport};
use super::transport::{ChatTransport, TransportEvent};
use super::{Message, MessageId, Role, SessionStatus};

const TURN_ABANDONED: &str = "The reply stream ended unexpectedly";
const NO_RUNTIME: &str = "No async runtime to stream the reply on";

/// Why a submission was not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRejection {
    /// A reply is still in flight.
    Busy(SessionStatus),
    /// The input is empty after trimming.
    EmptyInput,
}

/// Result of [`ChatSession::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The user message was appended and the turn started.
    Sent(MessageId),
    /// Nothing changed.
    Ignored(SubmitRejection),
}

impl SubmitOutcome {
    #[must_use]
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent(_))
    }
}

#[derive(Debug)]
struct TurnEvent {
    turn: u64,
    event: TransportEvent,
}

/// Builder for [`ChatSession`].
pub struct ChatSessionBuilder {
    transport: Arc<dyn ChatTransport>,
    usage: UsageLogger,
    credentials: Arc<dyn CredentialSource>,
    viewport: Arc<dyn Viewport>,
    catalog: FaqCatalog,
}

impl std::fmt::Debug for ChatSessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSessionBuilder")
            .field("usage", &self.usage)
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

impl ChatSessionBuilder {
    /// Usage logger for sent/received events. Defaults to disabled.
    #[must_use]
    pub fn usage(mut self, usage: UsageLogger) -> Self {
        self.usage = usage;
        self
    }

    /// Where the student token comes from. Defaults to none.
    #[must_use]
    pub fn credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Surface to scroll when the message list grows.
    #[must_use]
    pub fn viewport(mut self, viewport: Arc<dyn Viewport>) -> Self {
        self.viewport = viewport;
        self
    }

    /// Suggested topics shown before the first message.
    #[must_use]
    pub fn catalog(mut self, catalog: FaqCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    #[must_use]
    pub fn build(self) -> ChatSession {
        // Closed until the first turn opens its own channel.
        let (_, events_rx) = mpsc::unbounded_channel();
        ChatSession {
            transport: self.transport,
            usage: self.usage,
            credentials: self.credentials,
            viewport: self.viewport,
            catalog: self.catalog,
            messages: Vec::new(),
            input: String::new(),
            status: SessionStatus::Ready,
            error: None,
            show_suggestions: true,
            reply: None,
            logged_replies: HashSet::new(),
            scroll: ScrollAnchor::default(),
            turn: 0,
            events_rx,
        }
    }
}

/// State behind one chat window.
///
/// The session is the only writer of its message list and status. A
/// submitted turn runs on a spawned task that reports back through a
/// channel; callers apply those reports with [`next_event`](Self::next_event),
/// [`poll_events`](Self::poll_events) or [`settle`](Self::settle).
///
/// Usage logging never blocks: each event is dispatched on its own task and
/// its outcome is discarded.
pub struct ChatSession {
    transport: Arc<dyn ChatTransport>,
    usage: UsageLogger,
    credentials: Arc<dyn CredentialSource>,
    viewport: Arc<dyn Viewport>,
    catalog: FaqCatalog,
    messages: Vec<Message>,
    input: String,
    status: SessionStatus,
    error: Option<String>,
    show_suggestions: bool,
    /// Assistant message receiving deltas for the current turn.
    reply: Option<MessageId>,
    logged_replies: HashSet<MessageId>,
    scroll: ScrollAnchor,
    turn: u64,
    /// Receiving end of the current turn's channel. The turn task holds the
    /// only sender.
    events_rx: mpsc::UnboundedReceiver<TurnEvent>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("messages", &self.messages.len())
            .field("status", &self.status)
            .field("turn", &self.turn)
            .field("show_suggestions", &self.show_suggestions)
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    /// Start building a session on top of `transport`.
    pub fn builder(transport: Arc<dyn ChatTransport>) -> ChatSessionBuilder {
        ChatSessionBuilder {
            transport,
            usage: UsageLogger::disabled(),
            credentials: Arc::new(NoCredential),
            viewport: Arc::new(NoopViewport),
            catalog: FaqCatalog::korean_learning(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Text of the last transport failure, cleared by the next submission.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether the suggested topics panel is visible.
    ///
    /// The panel only renders while the conversation is empty.
    pub fn show_suggestions(&self) -> bool {
        self.show_suggestions && self.messages.is_empty()
    }

    pub fn catalog(&self) -> &FaqCatalog {
        &self.catalog
    }

    /// Composer enabled.
    pub fn accepts_input(&self) -> bool {
        self.status.accepts_input()
    }

    /// Send button enabled.
    pub fn can_send(&self) -> bool {
        self.accepts_input() && !self.input.trim().is_empty()
    }

    /// Replace the input buffer.
    pub fn set_input(&mut self, value: impl Into<String>) {
        self.input = value.into();
    }

    /// Send the current input.
    ///
    /// Logs `message_sent` without waiting, appends the user message, clears
    /// the input and starts streaming the reply. Does nothing while a reply is
    /// in flight or when the input is blank. Outside a tokio runtime the
    /// message is still appended but the turn fails straight away.
    pub fn submit(&mut self) -> SubmitOutcome {
        if !self.status.accepts_input() {
            return SubmitOutcome::Ignored(SubmitRejection::Busy(self.status));
        }
        if self.input.trim().is_empty() {
            return SubmitOutcome::Ignored(SubmitRejection::EmptyInput);
        }

        let content = std::mem::take(&mut self.input);
        self.log(UsageAction::MessageSent, &content);

        let message = Message::user(content);
        let id = message.id;
        self.push(message);

        self.status = SessionStatus::Submitted;
        self.error = None;
        self.reply = None;
        self.turn += 1;

        tracing::debug!(turn = self.turn, message_id = %id, "Chat turn submitted");
        self.spawn_turn();

        SubmitOutcome::Sent(id)
    }

    /// Put `question` in the composer, send it and hide the suggestions.
    ///
    /// While a reply is in flight nothing changes, the draft included.
    pub fn select_suggested_topic(&mut self, question: &str) -> SubmitOutcome {
        if !self.status.accepts_input() {
            return SubmitOutcome::Ignored(SubmitRejection::Busy(self.status));
        }
        self.set_input(question);
        let outcome = self.submit();
        self.show_suggestions = false;
        outcome
    }

    /// Log the assistant's reply once the session is back to ready.
    ///
    /// Safe to call on every `ready` transition: it does nothing unless the
    /// newest message is an assistant reply that has not been logged yet.
    pub fn on_assistant_message_complete(&mut self) {
        if self.status != SessionStatus::Ready {
            return;
        }
        let Some(last) = self.messages.last() else {
            return;
        };
        if last.role != Role::Assistant || !self.logged_replies.insert(last.id) {
            return;
        }

        let content = last.content.clone();
        self.log(UsageAction::MessageReceived, &content);
    }

    /// Wait for the next transport event and apply it.
    ///
    /// Returns `false` without waiting when no turn is in flight, and when
    /// the turn task went away without finishing (the session is then in
    /// `error`).
    pub async fn next_event(&mut self) -> bool {
        if !self.status.is_busy() {
            return false;
        }
        match self.events_rx.recv().await {
            Some(event) => {
                self.apply(event);
                true
            }
            None => {
                self.fail_turn(TURN_ABANDONED);
                false
            }
        }
    }

    /// Apply every transport event that has already arrived.
    pub fn poll_events(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.events_rx.try_recv() {
                Ok(event) => {
                    self.apply(event);
                    applied += 1;
                }
                Err(TryRecvError::Disconnected) if self.status.is_busy() => {
                    self.fail_turn(TURN_ABANDONED);
                    break;
                }
                Err(_) => break,
            }
        }
        applied
    }

    /// Apply events until the current turn has finished or failed.
    pub async fn settle(&mut self) {
        while self.status.is_busy() {
            if !self.next_event().await {
                break;
            }
        }
    }

    fn apply(&mut self, TurnEvent { turn, event }: TurnEvent) {
        if turn != self.turn {
            tracing::trace!(turn, current = self.turn, "Dropping event from stale turn");
            return;
        }
        if !self.status.is_busy() {
            return;
        }

        match event {
            TransportEvent::Started => self.status = SessionStatus::Streaming,
            TransportEvent::Delta(text) => {
                self.status = SessionStatus::Streaming;
                self.append_reply(&text);
            }
            TransportEvent::Finished => {
                self.status = SessionStatus::Ready;
                self.reply = None;
                self.on_assistant_message_complete();
            }
            TransportEvent::Failed(message) => self.fail_turn(message),
        }
    }

    fn fail_turn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(turn = self.turn, error = %message, "Chat turn failed");
        self.status = SessionStatus::Error;
        self.error = Some(message);
        self.reply = None;
    }

    fn append_reply(&mut self, text: &str) {
        if let Some(id) = self.reply {
            if let Some(message) = self.messages.iter_mut().rev().find(|m| m.id == id) {
                message.content.push_str(text);
                return;
            }
        }

        let message = Message::assistant(text);
        self.reply = Some(message.id);
        self.push(message);
    }

    fn push(&mut self, message: Message) {
        self.messages.push(message);
        if self.scroll.observe(self.messages.len()) {
            self.viewport.scroll_to_end(self.messages.len());
        }
    }

    fn log(&self, action: UsageAction, message: &str) {
        let token = self.credentials.student_token();
        self.usage.dispatch(action, token, message);
    }

    fn spawn_turn(&mut self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.fail_turn(NO_RUNTIME);
            return;
        };

        let turn = self.turn;
        let (tx, rx) = mpsc::unbounded_channel();
        self.events_rx = rx;
        let transport = Arc::clone(&self.transport);
        let history = self.messages.clone();

        handle.spawn(async move {
            let send = |event: TransportEvent| tx.send(TurnEvent { turn, event }).is_ok();

            let stream = match transport.stream(history).await {
                Ok(stream) => stream,
                Err(e) => {
                    send(TransportEvent::Failed(e.to_string()));
                    return;
                }
            };

            futures::pin_mut!(stream);
            while let Some(item) = stream.next().await {
                let event = match item {
                    Ok(event) => TransportEvent::from(event),
                    Err(e) => TransportEvent::Failed(e.to_string()),
                };
                let terminal = matches!(
                    event,
                    TransportEvent::Finished | TransportEvent::Failed(_)
                );
                if !send(event) || terminal {
                    return;
                }
            }

            send(TransportEvent::Finished);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EventStream;
    use crate::normalized::NormalizedEvent;
    use std::time::Duration;

    struct Echo;

    #[async_trait::async_trait]
    impl ChatTransport for Echo {
        async fn stream(&self, history: Vec<Message>) -> anyhow::Result<EventStream> {
            let last = history.last().map(|m| m.content.clone()).unwrap_or_default();
            let events = vec![
                Ok(NormalizedEvent::MessageDelta { text: "echo: ".into() }),
                Ok(NormalizedEvent::MessageDelta { text: last }),
                Ok(NormalizedEvent::Done),
            ];
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    /// Never answers.
    struct Silent;

    #[async_trait::async_trait]
    impl ChatTransport for Silent {
        async fn stream(&self, _history: Vec<Message>) -> anyhow::Result<EventStream> {
            Ok(Box::pin(futures::stream::pending::<
                anyhow::Result<NormalizedEvent>,
            >()))
        }
    }

    /// Dies inside the turn task.
    struct Crashing;

    #[async_trait::async_trait]
    impl ChatTransport for Crashing {
        async fn stream(&self, _history: Vec<Message>) -> anyhow::Result<EventStream> {
            panic!("transport crashed");
        }
    }

    fn session() -> ChatSession {
        ChatSession::builder(Arc::new(Echo)).build()
    }

    #[tokio::test]
    async fn test_deltas_join_into_one_reply() {
        let mut session = session();
        session.set_input("안녕");
        assert!(session.submit().is_sent());
        assert_eq!(session.status(), SessionStatus::Submitted);
        assert_eq!(session.input(), "");

        session.settle().await;

        assert_eq!(session.status(), SessionStatus::Ready);
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[1].content, "echo: 안녕");
    }

    #[tokio::test]
    async fn test_gating() {
        let mut session = session();
        assert!(!session.can_send());

        session.set_input("   ");
        assert_eq!(
            session.submit(),
            SubmitOutcome::Ignored(SubmitRejection::EmptyInput)
        );

        session.set_input("하나");
        assert!(session.submit().is_sent());
        session.set_input("둘");
        assert_eq!(
            session.submit(),
            SubmitOutcome::Ignored(SubmitRejection::Busy(SessionStatus::Submitted))
        );
        assert_eq!(session.input(), "둘");
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_suggestions_hidden_once_conversation_starts() {
        let mut session = session();
        assert!(session.show_suggestions());
        session.set_input("질문");
        session.submit();
        assert!(!session.show_suggestions());
    }

    #[tokio::test]
    async fn test_idle_next_event_returns_immediately() {
        let mut session = session();
        let waited = tokio::time::timeout(Duration::from_millis(500), session.next_event()).await;
        assert_eq!(waited, Ok(false));
        assert_eq!(session.poll_events(), 0);

        session.set_input("안녕");
        session.submit();
        session.settle().await;
        let waited = tokio::time::timeout(Duration::from_millis(500), session.next_event()).await;
        assert_eq!(waited, Ok(false));
    }

    #[tokio::test]
    async fn test_crashed_turn_ends_in_error() {
        let mut session = ChatSession::builder(Arc::new(Crashing)).build();
        session.set_input("질문");
        assert!(session.submit().is_sent());

        tokio::time::timeout(Duration::from_secs(2), session.settle())
            .await
            .expect("settle returns once the turn task is gone");
        assert_eq!(session.status(), SessionStatus::Error);
        assert_eq!(session.error(), Some(TURN_ABANDONED));
        assert!(session.accepts_input());
    }

    #[test]
    fn test_submit_without_runtime_fails_turn() {
        let mut session = session();
        session.set_input("런타임 없음");

        assert!(session.submit().is_sent());
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.status(), SessionStatus::Error);
        assert_eq!(session.error(), Some(NO_RUNTIME));
        assert!(session.accepts_input());
    }

    #[tokio::test]
    async fn test_topic_while_busy_keeps_draft() {
        let mut session = ChatSession::builder(Arc::new(Silent)).build();
        session.set_input("첫 질문");
        assert!(session.submit().is_sent());

        session.set_input("쓰던 글");
        assert_eq!(
            session.select_suggested_topic("발음을 연습하고 싶어요"),
            SubmitOutcome::Ignored(SubmitRejection::Busy(SessionStatus::Submitted))
        );
        assert_eq!(session.input(), "쓰던 글");
        assert_eq!(session.messages().len(), 1);
    }
}
