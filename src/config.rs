use crate::analytics::{AnalyticsSettings, DEFAULT_POSTHOG_HOST, PersonProfiles};
use crate::llm::{LlmSettings, Provider};
use clap::{Parser, Subcommand};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE", global = true)]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT", global = true)]
    pub port: Option<u16>,

    /// Base URL of the usage log service
    #[arg(long, env = "LOG_BASE_URL", global = true)]
    pub log_base_url: Option<String>,

    /// Enable rate limiting
    #[arg(long, env = "RATE_LIMIT_ENABLED", global = true)]
    pub rate_limit_enabled: Option<bool>,

    /// Disable timeout middleware
    #[arg(long, env = "TIMEOUT_DISABLED", global = true)]
    pub timeout_disabled: Option<bool>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Chat with the tutor from the terminal
    Chat {
        /// Server to talk to
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        server_url: String,
        /// Call the LLM directly instead of going through a server
        #[arg(long)]
        direct: bool,
        /// Student token attached to usage records
        #[arg(long, env = "STUDENT_TOKEN")]
        student_token: Option<String>,
        /// Cookie header to read the student token from
        #[arg(long, conflicts_with = "student_token")]
        cookie: Option<String>,
    },
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "TUTOR_PASSWORD")]
        password: String,
    },
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub usage: UsageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    pub analytics: AnalyticsConfig,
    pub resilience: ResilienceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UsageConfig {
    pub log_base_url: Option<String>,
    pub timeout_secs: u64,
}

impl UsageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    pub posthog_key: Option<String>,
    pub posthog_host: String,
    pub person_profiles: PersonProfiles,
    pub queue_capacity: usize,
}

impl AnalyticsConfig {
    /// Client settings, or `None` when no project key is configured.
    pub fn settings(&self) -> Option<AnalyticsSettings> {
        let key = self.posthog_key.as_deref()?.trim();
        if key.is_empty() {
            return None;
        }
        let mut settings = AnalyticsSettings::new(key);
        settings.host.clone_from(&self.posthog_host);
        settings.person_profiles = self.person_profiles;
        settings.queue_capacity = self.queue_capacity;
        Some(settings)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResilienceConfig {
    pub rate_limit_enabled: bool,
    pub timeout_disabled: bool,
    pub requests_per_second: f32,
    pub burst_size: f32,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Self::from_cli(&cli)
    }

    /// Layer defaults, config file, environment and CLI flags.
    ///
    /// Priority: CLI flag (or its env var) > legacy env names > `TUTOR_` env >
    /// config file > defaults.
    pub fn from_cli(cli: &Cli) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder()
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("usage.timeout_secs", 5)?
            .set_default("analytics.posthog_host", DEFAULT_POSTHOG_HOST)?
            .set_default("analytics.person_profiles", "identified_only")?
            .set_default("analytics.queue_capacity", 256)?
            .set_default("resilience.rate_limit_enabled", true)?
            .set_default("resilience.timeout_disabled", false)?
            .set_default("resilience.requests_per_second", 5.0)?
            .set_default("resilience.burst_size", 10.0)?;

        // Explicit file must exist; ./config.yaml is picked up when present.
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // Names the web app used, kept so existing deployments keep working.
        for (var, key) in [
            ("SUPABASE_URL", "auth.supabase_url"),
            ("SUPABASE_ANON_KEY", "auth.supabase_anon_key"),
            ("POSTHOG_KEY", "analytics.posthog_key"),
            ("POSTHOG_HOST", "analytics.posthog_host"),
        ] {
            if let Ok(val) = env::var(var) {
                if !val.trim().is_empty() {
                    builder = builder.set_override(key, val)?;
                }
            }
        }

        // E.g. TUTOR_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("TUTOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(url) = &cli.log_base_url {
            builder = builder.set_override("usage.log_base_url", url.as_str())?;
        }
        if let Some(rl) = cli.rate_limit_enabled {
            builder = builder.set_override("resilience.rate_limit_enabled", rl)?;
        }
        if let Some(td) = cli.timeout_disabled {
            builder = builder.set_override("resilience.timeout_disabled", td)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }
}

pub fn load_llm_settings() -> Result<LlmSettings, String> {
    let Ok(base_url) = env::var("LLM_BASE_URL") else {
        return Err("Missing required env var: LLM_BASE_URL".to_string());
    };
    if base_url.trim().is_empty() {
        return Err("LLM_BASE_URL cannot be empty".to_string());
    }

    let Ok(model) = env::var("LLM_MODEL") else {
        return Err("Missing required env var: LLM_MODEL".to_string());
    };
    if model.trim().is_empty() {
        return Err("LLM_MODEL cannot be empty".to_string());
    }

    let api_key = std::env::var("LLM_API_KEY")
        .ok()
        .filter(|s| !s.trim().is_empty());

    let provider = Provider::detect_from_url(&base_url).with_azure_deployment(
        std::env::var("AZURE_DEPLOYMENT_NAME").ok(),
        std::env::var("AZURE_API_VERSION").ok(),
    );

    if let Provider::AzureOpenAI {
        deployment_name, ..
    } = &provider
    {
        if deployment_name.is_empty() {
            return Err("AZURE_DEPLOYMENT_NAME is required for Azure OpenAI".to_string());
        }
    }

    Ok(LlmSettings {
        base_url,
        api_key,
        model,
        provider,
    })
}
