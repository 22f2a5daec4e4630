use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::error::{CoreError, Result};

/// Model provider family selected by the `LLM_PROVIDER` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    OpenAi,
    Anthropic,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Gemini => "gemini",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gemini" => Ok(LlmProvider::Gemini),
            "openai" => Ok(LlmProvider::OpenAi),
            "anthropic" => Ok(LlmProvider::Anthropic),
            other => Err(CoreError::InvalidConfig(format!(
                "unknown LLM provider '{other}' (expected gemini, openai or anthropic)"
            ))),
        }
    }
}

/// Model-runner settings: provider selection, credentials and retry budget.
#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub gemini_api_key: Option<SecretString>,
    pub openai_api_key: Option<SecretString>,
    pub anthropic_api_key: Option<SecretString>,
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub retry_backoff_factor: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Gemini,
            gemini_api_key: None,
            openai_api_key: None,
            anthropic_api_key: None,
            max_retries: 10,
            initial_retry_delay: Duration::from_millis(1000),
            max_retry_delay: Duration::from_millis(10_000),
            retry_backoff_factor: 2,
        }
    }
}

/// Container supervisor settings.
#[derive(Clone, Debug)]
pub struct DockerConfig {
    pub container_prefix: String,
    pub container_limit: usize,
    pub idle_timeout: Duration,
    pub default_image: String,
    pub socket_path: Option<String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            container_prefix: "builder6-container-".into(),
            container_limit: 5,
            idle_timeout: Duration::from_millis(600_000),
            default_image: "debian:stable-slim".into(),
            socket_path: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub github_token: SecretString,
    pub docker: DockerConfig,
    pub database_url: String,
    pub debug_enabled: bool,
}

impl AppConfig {
    /// Reads configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through an arbitrary key lookup. Blank values are
    /// treated as absent.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| -> Option<String> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let provider = get("LLM_PROVIDER")
            .ok_or_else(|| CoreError::InvalidConfig("LLM_PROVIDER is required".into()))?
            .parse::<LlmProvider>()?;

        let gemini_api_key = get("GEMINI_API_KEY").map(SecretString::from);
        let openai_api_key = get("OPENAI_API_KEY").map(SecretString::from);
        let anthropic_api_key = get("ANTHROPIC_API_KEY").map(SecretString::from);

        let selected_key_present = match provider {
            LlmProvider::Gemini => gemini_api_key.is_some(),
            LlmProvider::OpenAi => openai_api_key.is_some(),
            LlmProvider::Anthropic => anthropic_api_key.is_some(),
        };
        if !selected_key_present {
            return Err(CoreError::InvalidConfig(format!(
                "API key for the selected provider '{provider}' must be set"
            )));
        }

        let llm = LlmConfig {
            provider,
            gemini_api_key,
            openai_api_key,
            anthropic_api_key,
            max_retries: ranged_u64(&get, "LLM_MAX_RETRIES", 10, 0, 20)? as u32,
            initial_retry_delay: Duration::from_millis(ranged_u64(
                &get,
                "LLM_INITIAL_RETRY_DELAY",
                1000,
                100,
                10_000,
            )?),
            max_retry_delay: Duration::from_millis(ranged_u64(
                &get,
                "LLM_MAX_RETRY_DELAY",
                10_000,
                1000,
                60_000,
            )?),
            retry_backoff_factor: ranged_u64(&get, "LLM_RETRY_BACKOFF_FACTOR", 2, 1, 5)? as u32,
        };

        let github_token = get("GITHUB_TOKEN")
            .map(SecretString::from)
            .ok_or_else(|| CoreError::InvalidConfig("GITHUB_TOKEN is required".into()))?;

        let docker_defaults = DockerConfig::default();
        let docker = DockerConfig {
            container_prefix: get("DOCKER_CONTAINER_PREFIX")
                .unwrap_or(docker_defaults.container_prefix),
            container_limit: ranged_u64(&get, "DOCKER_CONTAINER_LIMIT", 5, 1, 100)? as usize,
            idle_timeout: Duration::from_millis(ranged_u64(
                &get,
                "DOCKER_IDLE_TIMEOUT",
                600_000,
                1000,
                86_400_000,
            )?),
            default_image: get("DOCKER_DEFAULT_IMAGE").unwrap_or(docker_defaults.default_image),
            socket_path: get("DOCKER_SOCKET_PATH"),
        };

        let database_url = get("DATABASE_URL")
            .ok_or_else(|| CoreError::InvalidConfig("DATABASE_URL is required".into()))?;
        validate_database_url(&database_url)?;

        let debug_enabled = get("DEBUG_ENABLED")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            llm,
            github_token,
            docker,
            database_url,
            debug_enabled,
        })
    }
}

fn ranged_u64<F>(get: &F, key: &str, default: u64, min: u64, max: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<u64>()
        .map_err(|_| CoreError::InvalidConfig(format!("{key} must be an integer, got '{raw}'")))?;
    if value < min || value > max {
        return Err(CoreError::InvalidConfig(format!(
            "{key} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(value)
}

fn validate_database_url(database_url: &str) -> Result<()> {
    if database_url.starts_with("postgresql://") {
        return Ok(());
    }
    Url::parse(database_url).map_err(|e| {
        CoreError::InvalidConfig(format!("DATABASE_URL is not a valid URL: {e}"))
    })?;
    Ok(())
}
