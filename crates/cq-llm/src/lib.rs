//! LLM layer for the campus query bot.
//!
//! Natural-language messages that no keyword route claims are sent here.
//! Two providers (Gemini, Groq) sit behind one `LlmProvider` trait; each is
//! wrapped in a `ProviderAdapter` that walks an ordered model chain with
//! classified retry, and a `FallbackOrchestrator` switches providers when
//! the primary is exhausted.
//!
//! - `IntentParser`: forced function calling -> `ParseResult`.
//! - `QueryExpander`: appends synonyms/translations to short queries,
//!   degrading to the original text on any failure.

pub mod adapter;
pub mod config;
pub mod context;
pub mod error;
pub mod expander;
pub mod fallback;
pub mod intent;
pub mod mock;
pub mod provider;
pub mod retry;
pub mod schema;

pub use adapter::{OperationKind, ProviderAdapter};
pub use config::{LlmConfig, ProviderKind, ProviderSettings};
pub use context::CallContext;
pub use error::{ErrorClass, LlmError, LlmResult};
pub use expander::{ExpanderConfig, QueryExpander};
pub use fallback::{FailoverEvent, FailoverObserver, FallbackOrchestrator, LogFailoverObserver};
pub use intent::IntentParser;
pub use mock::ScriptedProvider;
pub use provider::{LlmProvider, LlmRequest, LlmResponse, ToolChoice};
pub use retry::{Retrier, RetryPolicy};
