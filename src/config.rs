// Centralized configuration: environment variables with typed defaults,
// regionalized URL templates, startup validation.

use std::collections::HashMap;

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reasoning (thinking block) handling mode for model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningHandling {
    AsReasoningContent,
    Remove,
    Pass,
    StripTags,
}

impl ReasoningHandling {
    pub fn parse(s: &str) -> Self {
        match s {
            "remove" => Self::Remove,
            "pass" => Self::Pass,
            "strip_tags" => Self::StripTags,
            _ => Self::AsReasoningContent,
        }
    }
}

/// All gateway settings. Loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,

    // Proxy
    pub proxy_api_key: String,
    pub vpn_proxy_url: String,

    // Kiro credentials
    pub refresh_token: String,
    pub profile_arn: String,
    pub region: String,
    pub creds_file: String,
    pub cli_db_file: String,

    // Token lifecycle
    pub token_refresh_threshold: i64,

    // Retry
    pub max_retries: u32,
    pub base_retry_delay: f64,

    // Models
    pub hidden_models: HashMap<String, String>,
    pub model_aliases: HashMap<String, String>,
    pub hidden_from_list: Vec<String>,
    pub fallback_models: Vec<String>,
    pub model_cache_ttl: u64,
    pub max_input_tokens: u32,

    // Tools
    pub tool_description_max_length: usize,

    // Logging
    pub log_level: String,

    // Timeouts
    pub first_token_timeout: f64,
    pub streaming_read_timeout: f64,
    pub first_token_max_retries: u32,

    // Reasoning extraction
    pub reasoning_enabled: bool,
    pub reasoning_max_tokens: u32,
    pub reasoning_handling: ReasoningHandling,
    pub reasoning_open_tags: Vec<String>,
    pub reasoning_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            proxy_api_key: "my-super-secret-password-123".to_string(),
            vpn_proxy_url: String::new(),
            refresh_token: String::new(),
            profile_arn: String::new(),
            region: "us-east-1".to_string(),
            creds_file: String::new(),
            cli_db_file: String::new(),
            token_refresh_threshold: 600,
            max_retries: 3,
            base_retry_delay: 1.0,
            hidden_models: [(
                "claude-3.7-sonnet".to_string(),
                "CLAUDE_3_7_SONNET_20250219_V1_0".to_string(),
            )]
            .into_iter()
            .collect(),
            model_aliases: [("auto-kiro".to_string(), "auto".to_string())]
                .into_iter()
                .collect(),
            hidden_from_list: vec!["auto".to_string()],
            fallback_models: vec![
                "auto".to_string(),
                "claude-sonnet-4".to_string(),
                "claude-haiku-4.5".to_string(),
                "claude-sonnet-4.5".to_string(),
                "claude-opus-4.5".to_string(),
            ],
            model_cache_ttl: 3600,
            max_input_tokens: 200_000,
            tool_description_max_length: 10_000,
            log_level: "INFO".to_string(),
            first_token_timeout: 15.0,
            streaming_read_timeout: 300.0,
            first_token_max_retries: 3,
            reasoning_enabled: true,
            reasoning_max_tokens: 4000,
            reasoning_handling: ReasoningHandling::AsReasoningContent,
            reasoning_open_tags: vec![
                "<thinking>".to_string(),
                "alettek".to_string(),
                "<reasoning>".to_string(),
                "<thought>".to_string(),
            ],
            reasoning_buffer_size: 20,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn load() -> Self {
        let defaults = Self::default();
        Self {
            host: env_string("SERVER_HOST", &defaults.host),
            port: env_parse("SERVER_PORT", defaults.port),
            proxy_api_key: env_string("PROXY_API_KEY", &defaults.proxy_api_key),
            vpn_proxy_url: env_string("VPN_PROXY_URL", &defaults.vpn_proxy_url),
            refresh_token: env_string("REFRESH_TOKEN", ""),
            profile_arn: env_string("PROFILE_ARN", ""),
            region: env_string("KIRO_REGION", &defaults.region),
            creds_file: env_string("KIRO_CREDS_FILE", ""),
            cli_db_file: env_string("KIRO_CLI_DB_FILE", ""),
            token_refresh_threshold: env_parse(
                "TOKEN_REFRESH_THRESHOLD",
                defaults.token_refresh_threshold,
            ),
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries),
            base_retry_delay: env_parse("BASE_RETRY_DELAY", defaults.base_retry_delay),
            model_cache_ttl: env_parse("MODEL_CACHE_TTL", defaults.model_cache_ttl),
            max_input_tokens: env_parse("DEFAULT_MAX_INPUT_TOKENS", defaults.max_input_tokens),
            tool_description_max_length: env_parse(
                "TOOL_DESCRIPTION_MAX_LENGTH",
                defaults.tool_description_max_length,
            ),
            log_level: env_string("LOG_LEVEL", &defaults.log_level),
            first_token_timeout: env_parse("FIRST_TOKEN_TIMEOUT", defaults.first_token_timeout),
            streaming_read_timeout: env_parse(
                "STREAMING_READ_TIMEOUT",
                defaults.streaming_read_timeout,
            ),
            first_token_max_retries: env_parse(
                "FIRST_TOKEN_MAX_RETRIES",
                defaults.first_token_max_retries,
            ),
            reasoning_enabled: env_bool("FAKE_REASONING", defaults.reasoning_enabled),
            reasoning_max_tokens: env_parse(
                "FAKE_REASONING_MAX_TOKENS",
                defaults.reasoning_max_tokens,
            ),
            reasoning_handling: ReasoningHandling::parse(&env_string(
                "FAKE_REASONING_HANDLING",
                "as_reasoning_content",
            )),
            reasoning_buffer_size: env_parse(
                "FAKE_REASONING_INITIAL_BUFFER_SIZE",
                defaults.reasoning_buffer_size,
            ),
            hidden_models: defaults.hidden_models,
            model_aliases: defaults.model_aliases,
            hidden_from_list: defaults.hidden_from_list,
            fallback_models: defaults.fallback_models,
            reasoning_open_tags: defaults.reasoning_open_tags,
        }
    }

    /// Fail startup when no credential source is configured.
    pub fn validate(&self) -> Result<(), String> {
        if self.refresh_token.is_empty() && self.creds_file.is_empty() && self.cli_db_file.is_empty()
        {
            return Err(
                "no Kiro credentials configured. Set REFRESH_TOKEN, KIRO_CREDS_FILE, or KIRO_CLI_DB_FILE"
                    .to_string(),
            );
        }
        Ok(())
    }
}

// URL templates

pub fn get_kiro_refresh_url(region: &str) -> String {
    format!("https://prod.{}.auth.desktop.kiro.dev/refreshToken", region)
}

pub fn get_aws_sso_oidc_url(region: &str) -> String {
    format!("https://oidc.{}.amazonaws.com/token", region)
}

pub fn get_kiro_api_host(region: &str) -> String {
    format!("https://q.{}.amazonaws.com", region)
}

// Env helpers

fn env_string(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.token_refresh_threshold, 600);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.model_cache_ttl, 3600);
        assert_eq!(cfg.max_input_tokens, 200_000);
        assert_eq!(cfg.tool_description_max_length, 10_000);
        assert_eq!(cfg.first_token_timeout, 15.0);
        assert_eq!(cfg.streaming_read_timeout, 300.0);
        assert!(cfg.reasoning_enabled);
        assert_eq!(cfg.reasoning_handling, ReasoningHandling::AsReasoningContent);
        assert_eq!(cfg.reasoning_buffer_size, 20);
        assert_eq!(cfg.reasoning_open_tags.len(), 4);
    }

    #[test]
    fn test_default_model_tables() {
        let cfg = Config::default();
        assert_eq!(
            cfg.hidden_models.get("claude-3.7-sonnet").map(String::as_str),
            Some("CLAUDE_3_7_SONNET_20250219_V1_0")
        );
        assert_eq!(cfg.model_aliases.get("auto-kiro").map(String::as_str), Some("auto"));
        assert!(cfg.hidden_from_list.contains(&"auto".to_string()));
        assert!(cfg.fallback_models.contains(&"claude-sonnet-4.5".to_string()));
    }

    #[test]
    fn test_url_templates() {
        assert_eq!(
            get_kiro_refresh_url("us-east-1"),
            "https://prod.us-east-1.auth.desktop.kiro.dev/refreshToken"
        );
        assert_eq!(
            get_aws_sso_oidc_url("eu-west-1"),
            "https://oidc.eu-west-1.amazonaws.com/token"
        );
        assert_eq!(get_kiro_api_host("us-east-1"), "https://q.us-east-1.amazonaws.com");
    }

    #[test]
    fn test_validate_requires_credential_source() {
        let cfg = Config::default();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.refresh_token = "rt_123".to_string();
        assert!(cfg.validate().is_ok());

        let mut cfg = Config::default();
        cfg.creds_file = "~/.kiro/credentials.json".to_string();
        assert!(cfg.validate().is_ok());

        let mut cfg = Config::default();
        cfg.cli_db_file = "~/.kiro/db.sqlite".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_reasoning_handling_parse() {
        assert_eq!(ReasoningHandling::parse("remove"), ReasoningHandling::Remove);
        assert_eq!(ReasoningHandling::parse("pass"), ReasoningHandling::Pass);
        assert_eq!(ReasoningHandling::parse("strip_tags"), ReasoningHandling::StripTags);
        assert_eq!(
            ReasoningHandling::parse("as_reasoning_content"),
            ReasoningHandling::AsReasoningContent
        );
        assert_eq!(
            ReasoningHandling::parse("bogus"),
            ReasoningHandling::AsReasoningContent
        );
    }
}
