//! Korean Tutor Chat
//!
//! Entry point: serves the tutor over HTTP, or chats with it from a terminal.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};

use korean_tutor_chat::auth::{Field, LoginForm, SupabaseAuth};
use korean_tutor_chat::chat::{
    ChatSession, ChatTransport, DriverTransport, HttpChatTransport, MessageId, Role,
    SessionStatus, SubmitOutcome, SubmitRejection,
};
use korean_tutor_chat::config::{AppConfig, Cli, Command, load_llm_settings};
use korean_tutor_chat::credentials::{
    CookieCredential, CredentialSource, StaticCredential, StudentToken,
};
use korean_tutor_chat::llm::ChatCompletionsDriver;
use korean_tutor_chat::server::start_server;
use korean_tutor_chat::telemetry;
use korean_tutor_chat::usage::UsageLogger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    telemetry::init();

    let cli = Cli::parse();
    let config = Arc::new(AppConfig::from_cli(&cli)?);

    match cli.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => {
            let settings = match load_llm_settings() {
                Ok(s) => s,
                Err(msg) => {
                    eprintln!("Configuration error: {msg}");
                    std::process::exit(1);
                }
            };
            start_server(config, settings).await
        }
        Command::Chat {
            server_url,
            direct,
            student_token,
            cookie,
        } => {
            let transport: Arc<dyn ChatTransport> = if direct {
                let settings = load_llm_settings().map_err(anyhow::Error::msg)?;
                Arc::new(DriverTransport::new(Arc::new(ChatCompletionsDriver::new(
                    settings,
                ))))
            } else {
                Arc::new(HttpChatTransport::new(&server_url)?)
            };

            let credentials: Arc<dyn CredentialSource> = match cookie {
                Some(header) => Arc::new(CookieCredential::new(header)),
                None => Arc::new(StaticCredential::new(
                    student_token
                        .filter(|t| !t.trim().is_empty())
                        .map(StudentToken::new),
                )),
            };

            let usage = UsageLogger::from_base_url(
                config.usage.log_base_url.as_deref(),
                config.usage.timeout(),
            )?;
            if !usage.is_enabled() {
                tracing::info!("Usage logging disabled (LOG_BASE_URL not set)");
            }

            let session = ChatSession::builder(transport)
                .usage(usage)
                .credentials(credentials)
                .build();
            run_chat(session).await
        }
        Command::Login { email, password } => {
            let (Some(url), Some(key)) = (&config.auth.supabase_url, &config.auth.supabase_anon_key)
            else {
                anyhow::bail!("SUPABASE_URL and SUPABASE_ANON_KEY must be set to sign in");
            };
            let provider = Arc::new(SupabaseAuth::new(url, key.as_str())?);
            let mut form = LoginForm::new(provider);

            if form.submit(&email, &password).await {
                if let Some(session) = form.session() {
                    println!(
                        "로그인 성공: {}",
                        session.user.email.as_deref().unwrap_or(&session.user.id)
                    );
                    println!("{}", session.access_token);
                }
                return Ok(());
            }

            for field in [Field::Email, Field::Password] {
                if let Some(message) = form.field_error(field) {
                    eprintln!("{field:?}: {message}");
                }
            }
            if let Some(message) = form.error() {
                eprintln!("{message}");
            }
            std::process::exit(1);
        }
    }
}

/// Interactive loop: one line per submission, numbers pick a suggested topic.
async fn run_chat(mut session: ChatSession) -> anyhow::Result<()> {
    println!("안녕하세요! 👋 한국어 공부를 도와드릴게요!");
    print_suggestions(&session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line == "/quit" {
            break;
        }

        let topic = line
            .parse::<usize>()
            .ok()
            .filter(|_| session.show_suggestions())
            .and_then(|n| session.catalog().topics().get(n.wrapping_sub(1)));

        let outcome = match topic {
            Some(topic) => {
                println!("{}", topic.question);
                session.select_suggested_topic(topic.question)
            }
            None => {
                session.set_input(line);
                session.submit()
            }
        };

        match outcome {
            SubmitOutcome::Sent(_) => stream_reply(&mut session).await?,
            SubmitOutcome::Ignored(SubmitRejection::EmptyInput) => {}
            SubmitOutcome::Ignored(SubmitRejection::Busy(status)) => {
                eprintln!("(busy: {status})");
            }
        }
    }
    Ok(())
}

/// Print the assistant reply as it grows, until the turn settles.
async fn stream_reply(session: &mut ChatSession) -> anyhow::Result<()> {
    let mut printed: Option<(MessageId, usize)> = None;
    let mut out = std::io::stdout();

    while session.status().is_busy() {
        if !session.next_event().await {
            break;
        }
        let Some(last) = session.messages().last() else {
            continue;
        };
        if last.role != Role::Assistant {
            continue;
        }

        let offset = match printed {
            Some((id, len)) if id == last.id => len,
            _ => {
                print!("[{}] ", last.display_time());
                0
            }
        };
        if let Some(new_text) = last.content.get(offset..) {
            print!("{new_text}");
            out.flush()?;
        }
        printed = Some((last.id, last.content.len()));
    }

    if printed.is_some() {
        println!();
    }
    if session.status() == SessionStatus::Error {
        eprintln!(
            "오류가 발생했습니다: {}",
            session.error().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_suggestions(session: &ChatSession) {
    if !session.show_suggestions() {
        return;
    }
    println!("한국어 학습 도움:");
    for (i, topic) in session.catalog().topics().iter().enumerate() {
        println!("  {}. [{}] {}", i + 1, topic.category, topic.question);
    }
}
