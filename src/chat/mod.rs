//! Chat session state and the transport it drives.
//!
//! [`ChatSession`] is the view-model behind a chat window: it owns the
//! message list, the composer's input buffer, the submission status and the
//! visibility of the suggested topics. It forwards submissions to a
//! [`ChatTransport`] and reports usage to a [`UsageLogger`] without ever
//! waiting on the latter.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use korean_tutor_chat::chat::{ChatSession, HttpChatTransport};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let transport = Arc::new(HttpChatTransport::new("http://localhost:3000")?);
//! let mut session = ChatSession::builder(transport).build();
//!
//! session.set_input("안녕하세요");
//! session.submit();
//! session.settle().await;
//!
//! for message in session.messages() {
//!     println!("{:?}: {}", message.role, message.content);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [`UsageLogger`]: crate::usage::UsageLogger

mod message;
mod scroll;
mod session;
mod status;
mod transport;

pub use message::{Message, MessageId, Role};
pub use scroll::{NoopViewport, ScrollAnchor, Viewport};
pub use session::{ChatSession, ChatSessionBuilder, SubmitOutcome, SubmitRejection};
pub use status::SessionStatus;
pub use transport::{ChatTransport, DriverTransport, HttpChatTransport, TransportEvent};
