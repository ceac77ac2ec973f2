use korean_tutor_chat::analytics::PersonProfiles;
use korean_tutor_chat::config::AppConfig;
use serial_test::serial;
use std::env;
use std::fs;
use std::io::Write;

const BIN: &str = "korean-tutor-chat";

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        for var in [
            "TUTOR_SERVER__PORT",
            "TUTOR_USAGE__TIMEOUT_SECS",
            "TUTOR_RESILIENCE__RATE_LIMIT_ENABLED",
            "CONFIG_FILE",
            "PORT",
            "LOG_BASE_URL",
            "RATE_LIMIT_ENABLED",
            "TIMEOUT_DISABLED",
            "SUPABASE_URL",
            "SUPABASE_ANON_KEY",
            "POSTHOG_KEY",
            "POSTHOG_HOST",
        ] {
            env::remove_var(var);
        }
    }
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = AppConfig::load_from_args([BIN]).expect("defaults should load");
    assert_eq!(config.server.port, 3000);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.usage.log_base_url, None);
    assert_eq!(config.usage.timeout_secs, 5);
    assert!(config.auth.supabase_url.is_none());
    assert!(config.analytics.settings().is_none());
    assert_eq!(config.analytics.person_profiles, PersonProfiles::IdentifiedOnly);
    assert!(config.resilience.rate_limit_enabled);
    assert!(!config.resilience.timeout_disabled);
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("TUTOR_SERVER__PORT", "9090");
        env::set_var("TUTOR_RESILIENCE__RATE_LIMIT_ENABLED", "false");
    }

    let config = AppConfig::load_from_args([BIN]).expect("Failed to load config");
    assert_eq!(config.server.port, 9090);
    assert!(!config.resilience.rate_limit_enabled);

    clear_env_vars();
}

#[test]
#[serial]
fn test_cli_beats_env() {
    clear_env_vars();
    unsafe {
        env::set_var("TUTOR_SERVER__PORT", "9090");
    }

    let config = AppConfig::load_from_args([
        BIN,
        "--port",
        "8081",
        "--log-base-url",
        "https://school.example.com",
    ])
    .expect("Failed to load config");
    assert_eq!(config.server.port, 8081);
    assert_eq!(
        config.usage.log_base_url.as_deref(),
        Some("https://school.example.com")
    );

    clear_env_vars();
}

#[test]
#[serial]
fn test_legacy_env_names() {
    clear_env_vars();
    unsafe {
        env::set_var("LOG_BASE_URL", "https://logs.example.com");
        env::set_var("SUPABASE_URL", "https://abc.supabase.co");
        env::set_var("SUPABASE_ANON_KEY", "anon");
        env::set_var("POSTHOG_KEY", "phc_test");
        env::set_var("POSTHOG_HOST", "https://eu.i.posthog.com");
    }

    let config = AppConfig::load_from_args([BIN]).expect("Failed to load config");
    assert_eq!(
        config.usage.log_base_url.as_deref(),
        Some("https://logs.example.com")
    );
    assert_eq!(
        config.auth.supabase_url.as_deref(),
        Some("https://abc.supabase.co")
    );
    assert_eq!(config.auth.supabase_anon_key.as_deref(), Some("anon"));

    let analytics = config.analytics.settings().expect("analytics configured");
    assert_eq!(analytics.api_key, "phc_test");
    assert_eq!(analytics.host, "https://eu.i.posthog.com");

    clear_env_vars();
}

#[test]
#[serial]
fn test_blank_posthog_key_disables_analytics() {
    clear_env_vars();
    unsafe {
        env::set_var("POSTHOG_KEY", "   ");
    }

    let config = AppConfig::load_from_args([BIN]).expect("Failed to load config");
    assert!(config.analytics.settings().is_none());

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create temp config");
    write!(
        file,
        r"
server:
  port: 7070
usage:
  log_base_url: https://file.example.com
analytics:
  person_profiles: always
"
    )
    .expect("Failed to write temp config");

    // Tell AppConfig to use this file via Env Var (mocking CLI arg indirectly)
    unsafe {
        env::set_var("CONFIG_FILE", file.path());
    }

    let config = AppConfig::load_from_args([BIN]).expect("Failed to load config from file");
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(
        config.usage.log_base_url.as_deref(),
        Some("https://file.example.com")
    );
    assert_eq!(config.analytics.person_profiles, PersonProfiles::Always);

    clear_env_vars();
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    clear_env_vars();

    let result = AppConfig::load_from_args([BIN, "--config", "/nonexistent/tutor.yaml"]);
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_cwd_config_fallback() {
    clear_env_vars();

    // Create ./config.yaml
    let config_content = r"
server:
  port: 6060
    ";
    let cwd_path = "config.yaml";
    fs::write(cwd_path, config_content).expect("Failed to write ./config.yaml");

    let config = AppConfig::load_from_args([BIN]);

    fs::remove_file(cwd_path).expect("Failed to remove ./config.yaml");

    assert_eq!(config.expect("Failed to load config").server.port, 6060);
}
