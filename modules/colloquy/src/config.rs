//! Runtime settings from the environment.
//!
//! Secrets and tunables only; the world itself comes from the config file
//! (see `world.rs`). Built once in `main` and passed down explicitly.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ai_client::{Claude, OpenAi, TextGenerator};

use crate::error::ConfigError;
use crate::gateway::{GatewayOptions, RetryPolicy};
use crate::strategy::MemoryMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provider {
    #[default]
    Claude,
    OpenAi,
    OpenRouter,
}

impl Provider {
    pub fn key_var(self) -> &'static str {
        match self {
            Provider::Claude => "ANTHROPIC_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::Claude => "claude-haiku-4-5-20251001",
            Provider::OpenAi => "gpt-4o-mini",
            Provider::OpenRouter => "anthropic/claude-haiku-4.5",
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Ok(Provider::Claude),
            "openai" => Ok(Provider::OpenAi),
            "openrouter" => Ok(Provider::OpenRouter),
            other => Err(format!(
                "unknown provider '{other}' (expected claude|openai|openrouter)"
            )),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Provider::Claude => "claude",
            Provider::OpenAi => "openai",
            Provider::OpenRouter => "openrouter",
        })
    }
}

#[derive(Clone)]
pub struct Settings {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    /// Alternate endpoint, e.g. a local proxy. `None` uses the provider's own.
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub rate_limit_rpm: u32,
    pub max_retries: u32,
    pub retry_base: Duration,
    pub call_timeout: Duration,
    pub max_concurrency: usize,
    pub memory: MemoryMode,
}

// Hand-written so the key never reaches a log line via {:?}.
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("provider", &self.provider)
            .field("api_key", &key_preview(&self.api_key))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("max_retries", &self.max_retries)
            .field("retry_base", &self.retry_base)
            .field("call_timeout", &self.call_timeout)
            .field("max_concurrency", &self.max_concurrency)
            .field("memory", &self.memory)
            .finish()
    }
}

impl Settings {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let settings = Self::from_lookup(|key| std::env::var(key).ok())?;
        settings.log_keys();
        Ok(settings)
    }

    /// Build from any key/value source. Unset and blank values take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider: Provider = parse_or(&get, "COLLOQUY_PROVIDER", Provider::default())?;
        let api_key = get(provider.key_var())
            .ok_or_else(|| ConfigError::MissingEnv(provider.key_var().to_string()))?;
        let model = get("COLLOQUY_MODEL").unwrap_or_else(|| provider.default_model().to_string());

        let temperature: f32 = parse_or(&get, "COLLOQUY_TEMPERATURE", 0.7)?;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::Setting {
                key: "COLLOQUY_TEMPERATURE".into(),
                reason: format!("{temperature} is outside 0.0..=2.0"),
            });
        }
        let rate_limit_rpm: u32 = parse_or(&get, "COLLOQUY_RATE_LIMIT_RPM", 60)?;
        if rate_limit_rpm == 0 {
            return Err(ConfigError::Setting {
                key: "COLLOQUY_RATE_LIMIT_RPM".into(),
                reason: "must be greater than 0".into(),
            });
        }

        let max_tokens: u32 = parse_or(&get, "COLLOQUY_MAX_TOKENS", 1024)?;
        if max_tokens == 0 {
            return Err(ConfigError::Setting {
                key: "COLLOQUY_MAX_TOKENS".into(),
                reason: "must be greater than 0".into(),
            });
        }

        Ok(Self {
            provider,
            api_key,
            model,
            base_url: get("COLLOQUY_BASE_URL"),
            max_tokens,
            temperature,
            rate_limit_rpm,
            max_retries: parse_or(&get, "COLLOQUY_MAX_RETRIES", 3)?,
            retry_base: Duration::from_millis(parse_or(&get, "COLLOQUY_RETRY_BASE_MS", 1000)?),
            call_timeout: Duration::from_secs(parse_or(&get, "COLLOQUY_CALL_TIMEOUT_SECS", 60)?),
            max_concurrency: parse_or(&get, "COLLOQUY_MAX_CONCURRENCY", 4usize)?.max(1),
            memory: parse_or(&get, "COLLOQUY_MEMORY", MemoryMode::default())?,
        })
    }

    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            temperature: self.temperature,
            rate_limit_rpm: self.rate_limit_rpm,
            call_timeout: self.call_timeout,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.retry_base,
            ..RetryPolicy::default()
        }
    }

    pub fn build_generator(&self) -> Arc<dyn TextGenerator> {
        match self.provider {
            Provider::Claude => {
                let mut claude =
                    Claude::new(&self.api_key, &self.model).with_max_tokens(self.max_tokens);
                if let Some(url) = &self.base_url {
                    claude = claude.with_base_url(url);
                }
                Arc::new(claude)
            }
            Provider::OpenAi | Provider::OpenRouter => {
                let mut openai = match self.provider {
                    Provider::OpenRouter => {
                        OpenAi::openrouter(&self.api_key, &self.model).with_app_name("colloquy")
                    }
                    _ => OpenAi::new(&self.api_key, &self.model),
                }
                .with_max_tokens(self.max_tokens);
                if let Some(url) = &self.base_url {
                    openai = openai.with_base_url(url);
                }
                Arc::new(openai)
            }
        }
    }

    fn log_keys(&self) {
        tracing::info!("Settings loaded:");
        tracing::info!("  provider: {} ({})", self.provider, self.model);
        if let Some(url) = &self.base_url {
            tracing::info!("  base url: {url}");
        }
        tracing::info!("  {}: {}", self.provider.key_var(), key_preview(&self.api_key));
        tracing::info!(
            "  rate limit: {} rpm, {} retries, {}s call timeout",
            self.rate_limit_rpm,
            self.max_retries,
            self.call_timeout.as_secs()
        );
        tracing::info!("  memory: {:?}, concurrency: {}", self.memory, self.max_concurrency);
    }
}

fn key_preview(val: &str) -> String {
    let head = ai_client::truncate_to_char_boundary(val, 5);
    format!("{head}...({} chars)", val.len())
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Setting {
            key: key.to_string(),
            reason: e.to_string(),
        }),
    }
}
