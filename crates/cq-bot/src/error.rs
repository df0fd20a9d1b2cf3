//! Error types for the bot crate.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Why a module could not act on a parsed intent.
///
/// Both variants collapse to the generic help reply at the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("{module}/{intent}: missing required parameter {param}")]
    MissingParameter {
        module: &'static str,
        intent: String,
        param: &'static str,
    },

    #[error("{module}: unknown intent {intent}")]
    UnknownIntent { module: &'static str, intent: String },
}

impl DispatchError {
    pub fn missing(module: &'static str, intent: &str, param: &'static str) -> Self {
        Self::MissingParameter {
            module,
            intent: intent.to_string(),
            param,
        }
    }

    pub fn unknown(module: &'static str, intent: &str) -> Self {
        Self::UnknownIntent {
            module,
            intent: intent.to_string(),
        }
    }

    /// Telemetry label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingParameter { .. } => "missing_parameter",
            Self::UnknownIntent { .. } => "unknown_intent",
        }
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Failures while assembling the bot at startup.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("invalid route pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("reply transport: {0}")]
    Sink(#[from] SinkError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Delivery failures of the reply transport.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("reply API returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("reply transport error: {0}")]
    Transport(String),
}

/// HTTP-facing error for the webhook server.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
