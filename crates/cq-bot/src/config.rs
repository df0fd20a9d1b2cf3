//! Bot server configuration.

use std::str::FromStr;
use std::time::Duration;

use cq_llm::LlmConfig;
use cq_ratelimit::KeyedConfig;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::sink::DEFAULT_LINE_API_BASE;

/// Top-level bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Listen address (e.g., "0.0.0.0").
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// LINE channel access token. Replies are only logged when absent.
    #[serde(default)]
    pub line_channel_access_token: Option<String>,
    #[serde(default = "default_line_api_base")]
    pub line_api_base: String,
    /// Upper bound on handling one event, NLU included.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Webhook admission, keyed by chat id.
    #[serde(default = "default_user_limiter")]
    pub user_limiter: KeyedConfig,
    /// NLU admission, keyed by chat id.
    #[serde(default = "default_llm_limiter")]
    pub llm_limiter: KeyedConfig,
    #[serde(default = "default_janitor_interval_secs")]
    pub janitor_interval_secs: u64,
    #[serde(default)]
    pub llm: LlmConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_line_api_base() -> String {
    DEFAULT_LINE_API_BASE.to_string()
}

fn default_request_timeout_secs() -> u64 {
    25
}

fn default_user_limiter() -> KeyedConfig {
    KeyedConfig::new(6, 0.2)
}

fn default_llm_limiter() -> KeyedConfig {
    KeyedConfig::new(20, 10.0 / 3600.0).with_daily_limit(50)
}

fn default_janitor_interval_secs() -> u64 {
    300
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            line_channel_access_token: None,
            line_api_base: default_line_api_base(),
            request_timeout_secs: default_request_timeout_secs(),
            user_limiter: default_user_limiter(),
            llm_limiter: default_llm_limiter(),
            janitor_interval_secs: default_janitor_interval_secs(),
            llm: LlmConfig::default(),
        }
    }
}

fn parse_or_warn<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = raw, "ignoring unparseable setting");
            None
        }
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|raw| parse_or_warn(key, &raw))
}

impl BotConfig {
    /// Load config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the known keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let llm = LlmConfig::from_lookup(&lookup);
        let mut config = Self {
            llm,
            ..Self::default()
        };
        config.apply_overrides(&lookup);
        config
    }

    /// Load a TOML file; environment variables still take precedence.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let mut config: Self = toml::from_str(&contents)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("HOST") {
            self.host = host;
        }
        if let Some(port) = parsed(&get, "PORT") {
            self.port = port;
        }
        if let Some(token) = get("LINE_CHANNEL_ACCESS_TOKEN") {
            self.line_channel_access_token = Some(token);
        }
        if let Some(base) = get("LINE_API_BASE") {
            self.line_api_base = base;
        }
        if let Some(secs) = parsed(&get, "REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = secs;
        }
        if let Some(secs) = parsed(&get, "LIMITER_JANITOR_INTERVAL_SECS") {
            self.janitor_interval_secs = secs;
        }

        if let Some(burst) = parsed(&get, "USER_BURST_TOKENS") {
            self.user_limiter.burst = burst;
        }
        if let Some(rate) = parsed(&get, "USER_REFILL_PER_SECOND") {
            self.user_limiter.refill_rate = rate;
        }
        if let Some(burst) = parsed(&get, "LLM_BURST_TOKENS") {
            self.llm_limiter.burst = burst;
        }
        if let Some(per_hour) = parsed::<f64>(&get, "LLM_REFILL_PER_HOUR") {
            self.llm_limiter.refill_rate = per_hour / 3600.0;
        }
        // Zero or negative (conventionally -1) disables the daily cap.
        if let Some(limit) = parsed::<i64>(&get, "LLM_DAILY_LIMIT") {
            self.llm_limiter.daily_limit = u32::try_from(limit.max(0)).unwrap_or(u32::MAX);
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs.max(1))
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
