//! LLM configuration, loadable from TOML or environment.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::adapter::ProviderAdapter;
use crate::expander::ExpanderConfig;
use crate::fallback::{FailoverObserver, FallbackOrchestrator};
use crate::provider::{GeminiProvider, GroqProvider, LlmProvider, gemini, groq};
use crate::retry::{Retrier, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Groq,
}

#[derive(Debug, Error)]
#[error("unknown llm provider {0:?} (expected gemini or groq)")]
pub struct UnknownProvider(String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "groq" => Ok(Self::Groq),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Groq => "groq",
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI",
            Self::Groq => "GROQ",
        }
    }
}

/// Credentials and model chains for one provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    /// No key disables the provider.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Override of the vendor endpoint (tests, proxies).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub intent_models: Vec<String>,
    #[serde(default)]
    pub expander_models: Vec<String>,
}

impl ProviderSettings {
    pub fn defaults(kind: ProviderKind) -> Self {
        let (intent, expander) = match kind {
            ProviderKind::Gemini => (
                &["gemini-2.5-flash", "gemini-2.5-flash-lite"][..],
                &["gemini-2.5-flash-lite"][..],
            ),
            ProviderKind::Groq => (
                &["llama-3.3-70b-versatile", "llama-3.1-8b-instant"][..],
                &["llama-3.1-8b-instant"][..],
            ),
        };
        Self {
            api_key: None,
            base_url: None,
            intent_models: intent.iter().map(|m| m.to_string()).collect(),
            expander_models: expander.iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// Top-level LLM configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_primary")]
    pub primary: ProviderKind,
    /// `None` disables failover.
    #[serde(default = "default_fallback")]
    pub fallback: Option<ProviderKind>,
    #[serde(default = "default_gemini")]
    pub gemini: ProviderSettings,
    #[serde(default = "default_groq")]
    pub groq: ProviderSettings,
    #[serde(default = "default_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_cap_delay_ms")]
    pub retry_cap_delay_ms: u64,
    /// Attempts are not started with less than this left on the deadline.
    #[serde(default = "default_deadline_floor_ms")]
    pub deadline_floor_ms: u64,
    /// Per HTTP call, further capped by the request deadline.
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    /// Seeds retry jitter for reproducible runs.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_expander_max_runes")]
    pub expander_max_runes: usize,
}

fn default_primary() -> ProviderKind {
    ProviderKind::Gemini
}
fn default_fallback() -> Option<ProviderKind> {
    Some(ProviderKind::Groq)
}
fn default_gemini() -> ProviderSettings {
    ProviderSettings::defaults(ProviderKind::Gemini)
}
fn default_groq() -> ProviderSettings {
    ProviderSettings::defaults(ProviderKind::Groq)
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_cap_delay_ms() -> u64 {
    5_000
}
fn default_deadline_floor_ms() -> u64 {
    1_500
}
fn default_provider_timeout_secs() -> u64 {
    10
}
fn default_expander_max_runes() -> usize {
    15
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            fallback: default_fallback(),
            gemini: default_gemini(),
            groq: default_groq(),
            retry_max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_cap_delay_ms: default_cap_delay_ms(),
            deadline_floor_ms: default_deadline_floor_ms(),
            provider_timeout_secs: default_provider_timeout_secs(),
            seed: None,
            expander_max_runes: default_expander_max_runes(),
        }
    }
}

fn parse_models(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from)
        .collect()
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

/// Milliseconds from `250ms`, `2s`, `1.5s`, `1m`, or a bare number of
/// milliseconds.
fn parse_delay_ms(key: &str, raw: &str) -> Option<u64> {
    let value = raw.trim();
    let (number, scale) = if let Some(n) = value.strip_suffix("ms") {
        (n, 1.0)
    } else if let Some(n) = value.strip_suffix('s') {
        (n, 1_000.0)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 60_000.0)
    } else {
        (value, 1.0)
    };
    match number.trim().parse::<f64>() {
        Ok(n) if n.is_finite() && n >= 0.0 => Some((n * scale).round() as u64),
        _ => {
            tracing::warn!(key, value = raw, "ignoring unparseable duration");
            None
        }
    }
}

impl LlmConfig {
    /// Load config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the known keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup("LLM_PRIMARY_PROVIDER") {
            match raw.parse() {
                Ok(kind) => config.primary = kind,
                Err(e) => tracing::warn!(error = %e, "keeping default primary provider"),
            }
        }
        if let Some(raw) = lookup("LLM_FALLBACK_PROVIDER") {
            let raw = raw.trim();
            if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
                config.fallback = None;
            } else {
                match raw.parse() {
                    Ok(kind) => config.fallback = Some(kind),
                    Err(e) => tracing::warn!(error = %e, "keeping default fallback provider"),
                }
            }
        }

        for kind in [ProviderKind::Gemini, ProviderKind::Groq] {
            let prefix = kind.env_prefix();
            let settings = config.settings_mut(kind);
            if let Some(key) = lookup(&format!("{prefix}_API_KEY")) {
                settings.api_key = Some(key);
            }
            if let Some(url) = lookup(&format!("{prefix}_BASE_URL")) {
                settings.base_url = Some(url);
            }
            if let Some(raw) = lookup(&format!("{prefix}_INTENT_MODELS")) {
                settings.intent_models = parse_models(&raw);
            }
            if let Some(raw) = lookup(&format!("{prefix}_EXPANDER_MODELS")) {
                settings.expander_models = parse_models(&raw);
            }
        }

        let number = |key: &str| lookup(key).and_then(|raw| parse_or_warn::<u64>(key, &raw));
        if let Some(v) = number("RETRY_MAX_ATTEMPTS") {
            config.retry_max_attempts = u32::try_from(v).unwrap_or(u32::MAX);
        }
        // `RETRY_BASE_DELAY` / `RETRY_CAP_DELAY` take a duration; the `_MS`
        // forms are plain milliseconds and win when both are set.
        let delay = |key: &str, ms_key: &str| {
            number(ms_key).or_else(|| lookup(key).and_then(|raw| parse_delay_ms(key, &raw)))
        };
        if let Some(v) = delay("RETRY_BASE_DELAY", "RETRY_BASE_DELAY_MS") {
            config.retry_base_delay_ms = v;
        }
        if let Some(v) = delay("RETRY_CAP_DELAY", "RETRY_CAP_DELAY_MS") {
            config.retry_cap_delay_ms = v;
        }
        if let Some(v) = number("LLM_DEADLINE_FLOOR_MS") {
            config.deadline_floor_ms = v;
        }
        if let Some(v) = number("LLM_PROVIDER_TIMEOUT_SECS") {
            config.provider_timeout_secs = v;
        }
        if let Some(v) = number("LLM_SEED") {
            config.seed = Some(v);
        }

        config
    }

    pub fn settings(&self, kind: ProviderKind) -> &ProviderSettings {
        match kind {
            ProviderKind::Gemini => &self.gemini,
            ProviderKind::Groq => &self.groq,
        }
    }

    fn settings_mut(&mut self, kind: ProviderKind) -> &mut ProviderSettings {
        match kind {
            ProviderKind::Gemini => &mut self.gemini,
            ProviderKind::Groq => &mut self.groq,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_cap_delay_ms),
        )
    }

    pub fn expander_config(&self) -> ExpanderConfig {
        ExpanderConfig {
            max_runes: self.expander_max_runes,
            ..ExpanderConfig::default()
        }
    }

    /// Providers with an API key, primary first, without duplicates.
    pub fn enabled_providers(&self) -> Vec<ProviderKind> {
        let mut order = vec![self.primary];
        if let Some(fallback) = self.fallback
            && fallback != self.primary
        {
            order.push(fallback);
        }
        order
            .into_iter()
            .filter(|kind| self.settings(*kind).is_enabled())
            .collect()
    }

    fn retrier(&self, salt: u64) -> Retrier {
        let retrier = match self.seed {
            Some(seed) => Retrier::seeded(self.retry_policy(), seed.wrapping_add(salt)),
            None => Retrier::new(self.retry_policy()),
        };
        retrier.with_deadline_floor(Duration::from_millis(self.deadline_floor_ms))
    }

    fn adapter(&self, kind: ProviderKind, salt: u64) -> ProviderAdapter {
        let settings = self.settings(kind);
        let api_key = settings.api_key.clone().unwrap_or_default();
        let timeout = Duration::from_secs(self.provider_timeout_secs);
        let provider: Arc<dyn LlmProvider> = match kind {
            ProviderKind::Gemini => Arc::new(GeminiProvider::new(
                api_key,
                settings.base_url.as_deref().unwrap_or(gemini::DEFAULT_BASE_URL),
                timeout,
            )),
            ProviderKind::Groq => Arc::new(GroqProvider::new(
                api_key,
                settings.base_url.as_deref().unwrap_or(groq::DEFAULT_BASE_URL),
                timeout,
            )),
        };
        ProviderAdapter::new(provider, self.retrier(salt))
            .with_intent_models(settings.intent_models.iter().cloned())
            .with_expander_models(settings.expander_models.iter().cloned())
    }

    /// Orchestrator over the enabled providers; `None` when no key is set,
    /// which turns NLU off.
    pub fn build(&self, observer: Arc<dyn FailoverObserver>) -> Option<Arc<FallbackOrchestrator>> {
        let enabled = self.enabled_providers();
        let (first, rest) = enabled.split_first()?;

        let mut orchestrator = FallbackOrchestrator::new(self.adapter(*first, 0)).with_observer(observer);
        if let Some(second) = rest.first() {
            orchestrator = orchestrator.with_secondary(self.adapter(*second, 1));
        }
        tracing::info!(
            primary = first.as_str(),
            secondary = rest.first().map(ProviderKind::as_str),
            "llm providers configured"
        );
        Some(Arc::new(orchestrator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::LogFailoverObserver;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config() {
        let config = LlmConfig::default();
        assert_eq!(config.primary, ProviderKind::Gemini);
        assert_eq!(config.fallback, Some(ProviderKind::Groq));
        assert_eq!(config.gemini.intent_models[0], "gemini-2.5-flash");
        assert_eq!(config.groq.expander_models, vec!["llama-3.1-8b-instant"]);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert!(config.enabled_providers().is_empty());
    }

    #[test]
    fn env_overrides() {
        let config = LlmConfig::from_lookup(lookup_from(&[
            ("LLM_PRIMARY_PROVIDER", "Groq"),
            ("LLM_FALLBACK_PROVIDER", "gemini"),
            ("GROQ_API_KEY", "gsk-1"),
            ("GEMINI_API_KEY", "g-1"),
            ("GROQ_INTENT_MODELS", " a , b ,, c "),
            ("RETRY_MAX_ATTEMPTS", "5"),
            ("RETRY_BASE_DELAY_MS", "100"),
            ("LLM_DEADLINE_FLOOR_MS", "oops"),
        ]));
        assert_eq!(config.primary, ProviderKind::Groq);
        assert_eq!(config.groq.intent_models, vec!["a", "b", "c"]);
        assert_eq!(config.retry_max_attempts, 5);
        assert_eq!(config.retry_base_delay_ms, 100);
        assert_eq!(config.deadline_floor_ms, 1_500);
        assert_eq!(
            config.enabled_providers(),
            vec![ProviderKind::Groq, ProviderKind::Gemini]
        );
    }

    #[test]
    fn retry_delays_accept_durations() {
        let config = LlmConfig::from_lookup(lookup_from(&[
            ("RETRY_BASE_DELAY", "250ms"),
            ("RETRY_CAP_DELAY", "1.5s"),
        ]));
        assert_eq!(config.retry_base_delay_ms, 250);
        assert_eq!(config.retry_cap_delay_ms, 1_500);

        let config = LlmConfig::from_lookup(lookup_from(&[
            ("RETRY_BASE_DELAY", "400"),
            ("RETRY_CAP_DELAY", "1m"),
        ]));
        assert_eq!(config.retry_base_delay_ms, 400);
        assert_eq!(config.retry_cap_delay_ms, 60_000);

        let config = LlmConfig::from_lookup(lookup_from(&[
            ("RETRY_BASE_DELAY", "2s"),
            ("RETRY_BASE_DELAY_MS", "300"),
            ("RETRY_CAP_DELAY", "soon"),
        ]));
        assert_eq!(config.retry_base_delay_ms, 300);
        assert_eq!(config.retry_cap_delay_ms, LlmConfig::default().retry_cap_delay_ms);
    }

    #[test]
    fn fallback_can_be_disabled() {
        let config = LlmConfig::from_lookup(lookup_from(&[
            ("LLM_FALLBACK_PROVIDER", "none"),
            ("GEMINI_API_KEY", "g-1"),
            ("GROQ_API_KEY", "gsk-1"),
        ]));
        assert_eq!(config.enabled_providers(), vec![ProviderKind::Gemini]);
    }

    #[test]
    fn missing_primary_key_promotes_fallback() {
        let config = LlmConfig::from_lookup(lookup_from(&[("GROQ_API_KEY", "gsk-1")]));
        assert_eq!(config.enabled_providers(), vec![ProviderKind::Groq]);

        let orch = config.build(Arc::new(LogFailoverObserver)).unwrap();
        assert_eq!(orch.primary().name(), "groq");
        assert!(orch.secondary().is_none());
    }

    #[test]
    fn no_keys_disables_nlu() {
        let config = LlmConfig::from_lookup(lookup_from(&[("GEMINI_API_KEY", "  ")]));
        assert!(config.build(Arc::new(LogFailoverObserver)).is_none());
    }

    #[test]
    fn both_keys_build_pair() {
        let config = LlmConfig::from_lookup(lookup_from(&[
            ("GEMINI_API_KEY", "g-1"),
            ("GROQ_API_KEY", "gsk-1"),
        ]));
        let orch = config.build(Arc::new(LogFailoverObserver)).unwrap();
        assert_eq!(orch.primary().name(), "gemini");
        assert_eq!(orch.secondary().unwrap().name(), "groq");
    }

    #[test]
    fn provider_kind_parsing() {
        assert_eq!("GEMINI".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert!("openai".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn deserialize_from_toml() {
        let toml = r#"
primary = "groq"
fallback = "gemini"
retry_max_attempts = 2

[groq]
api_key = "gsk-1"
intent_models = ["llama-3.3-70b-versatile"]
"#;
        let config: LlmConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.primary, ProviderKind::Groq);
        assert_eq!(config.retry_max_attempts, 2);
        assert_eq!(config.groq.intent_models.len(), 1);
        assert!(config.groq.expander_models.is_empty());
        assert_eq!(config.gemini.intent_models.len(), 2);
    }
}
