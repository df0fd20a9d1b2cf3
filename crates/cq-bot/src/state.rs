//! Shared application state for the Axum server.

use std::sync::Arc;
use std::time::Duration;

use cq_llm::{FailoverObserver, IntentParser, QueryExpander};
use cq_ratelimit::KeyedLimiter;

use crate::catalog::DataSources;
use crate::config::BotConfig;
use crate::dispatcher::Dispatcher;
use crate::error::BotError;
use crate::modules::standard_modules;
use crate::sink::{LineReplyClient, LogReplySink, ReplySink};
use crate::telemetry::Telemetry;

const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub sink: Arc<dyn ReplySink>,
    pub user_limiter: Arc<KeyedLimiter>,
    pub llm_limiter: Arc<KeyedLimiter>,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        sink: Arc<dyn ReplySink>,
        user_limiter: Arc<KeyedLimiter>,
        llm_limiter: Arc<KeyedLimiter>,
    ) -> Self {
        Self {
            dispatcher,
            sink,
            user_limiter,
            llm_limiter,
        }
    }

    /// Wire limiters, providers, modules and the reply transport from config.
    pub fn from_config(config: &BotConfig, sources: &DataSources) -> Result<Self, BotError> {
        let sink: Arc<dyn ReplySink> = match &config.line_channel_access_token {
            Some(token) => Arc::new(LineReplyClient::new(
                token.clone(),
                config.line_api_base.clone(),
                REPLY_TIMEOUT,
            )?),
            None => {
                tracing::warn!("LINE_CHANNEL_ACCESS_TOKEN not set, replies are only logged");
                Arc::new(LogReplySink)
            }
        };
        Self::with_sink(config, sources, sink)
    }

    /// Same as `from_config` with a caller-supplied reply transport.
    pub fn with_sink(
        config: &BotConfig,
        sources: &DataSources,
        sink: Arc<dyn ReplySink>,
    ) -> Result<Self, BotError> {
        let telemetry = Arc::new(Telemetry::new());
        let user_limiter = Arc::new(KeyedLimiter::new("webhook", config.user_limiter.clone()));
        let llm_limiter = Arc::new(KeyedLimiter::new("llm", config.llm_limiter.clone()));

        let observer: Arc<dyn FailoverObserver> = telemetry.clone();
        let orchestrator = config.llm.build(observer);
        let expander = match &orchestrator {
            Some(orch) => QueryExpander::new(orch.clone(), config.llm.expander_config()),
            None => {
                tracing::warn!("no LLM provider key configured, NLU and query expansion disabled");
                QueryExpander::disabled()
            }
        };

        let modules = standard_modules(
            sources,
            user_limiter.clone(),
            llm_limiter.clone(),
            Arc::new(expander),
        )?;
        let mut dispatcher = Dispatcher::new(
            modules,
            user_limiter.clone(),
            llm_limiter.clone(),
            telemetry,
        )
        .with_request_timeout(config.request_timeout());
        if let Some(orch) = orchestrator {
            tracing::info!(
                primary = orch.primary().name(),
                secondary = ?orch.secondary().map(|s| s.name()),
                "NLU enabled"
            );
            dispatcher = dispatcher.with_intent_parser(IntentParser::new(orch));
        }

        Ok(Self::new(Arc::new(dispatcher), sink, user_limiter, llm_limiter))
    }
}
