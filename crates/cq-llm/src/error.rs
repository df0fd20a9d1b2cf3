//! LLM error types and their retry classification.

use serde::Serialize;
use thiserror::Error;

/// Retry class of a failed call. Only `Transient` is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Rate limiting, server errors, timeouts, dropped connections.
    Transient,
    /// Bad requests, auth failures, malformed or off-schema responses.
    Permanent,
    /// The caller gave up (cancellation or deadline floor).
    Canceled,
}

impl ErrorClass {
    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            408 | 429 | 500..=599 => Self::Transient,
            _ => Self::Permanent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from LLM providers and the layers above them.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("{provider} returned HTTP {status}: {message}")]
    Http {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider} transport error: {message}")]
    Transport { provider: String, message: String },

    #[error("malformed response from {provider}: {message}")]
    Malformed { provider: String, message: String },

    #[error("schema violation: {0}")]
    Schema(String),

    #[error("no model configured for {0}")]
    NotConfigured(String),

    #[error("request canceled")]
    Canceled,

    #[error("deadline too close to start another attempt ({remaining_ms} ms left)")]
    DeadlineExceeded { remaining_ms: u64 },
}

/// Convenience alias for LLM results.
pub type LlmResult<T> = Result<T, LlmError>;

impl LlmError {
    pub fn http(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    pub fn malformed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Convert a `reqwest` failure, keeping the status code when there is one.
    pub fn from_reqwest(provider: &str, err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::http(provider, status.as_u16(), err.to_string());
        }
        if err.is_decode() || err.is_body() {
            return Self::malformed(provider, err.to_string());
        }
        // Timeouts, refused/reset connections and other I/O failures.
        Self::Transport {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Http { status, .. } => ErrorClass::from_status(*status),
            Self::Transport { .. } => ErrorClass::Transient,
            Self::Malformed { .. } | Self::Schema(_) | Self::NotConfigured(_) => {
                ErrorClass::Permanent
            }
            Self::Canceled | Self::DeadlineExceeded { .. } => ErrorClass::Canceled,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// A permanent failure that says the provider cannot serve any request
    /// with this key (revoked or unauthorised), as opposed to this request
    /// being bad.
    pub fn is_provider_unavailable(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }

    /// Whether the orchestrator should try the other provider.
    pub fn warrants_failover(&self) -> bool {
        self.class() == ErrorClass::Transient || self.is_provider_unavailable()
    }
}
