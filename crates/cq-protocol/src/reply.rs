//! Outbound reply messages.
//!
//! Rendering to the messaging platform's wire format is the transport's
//! concern; these types only carry what the bot decided to say.

use serde::{Deserialize, Serialize};

/// Maximum quick-reply buttons the platform accepts on one message.
pub const MAX_QUICK_REPLIES: usize = 13;

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        quick_replies: Vec<QuickReply>,
    },
    Flex {
        alt_text: String,
        contents: serde_json::Value,
    },
    Template {
        alt_text: String,
        template: serde_json::Value,
    },
    Image {
        original_url: String,
        preview_url: String,
    },
}

impl Reply {
    /// Plain text message without quick replies.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            quick_replies: Vec::new(),
        }
    }

    /// Text message with quick-reply buttons (truncated to the platform limit).
    pub fn text_with_quick_replies(text: impl Into<String>, mut quick: Vec<QuickReply>) -> Self {
        quick.truncate(MAX_QUICK_REPLIES);
        Self::Text {
            text: text.into(),
            quick_replies: quick,
        }
    }

    /// Text body for text messages, alt text for the rest.
    pub fn summary(&self) -> &str {
        match self {
            Self::Text { text, .. } => text,
            Self::Flex { alt_text, .. } | Self::Template { alt_text, .. } => alt_text,
            Self::Image { original_url, .. } => original_url,
        }
    }
}

/// A quick-reply button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickReply {
    pub label: String,
    pub action: QuickAction,
}

/// What a quick-reply button does when tapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum QuickAction {
    /// Sends the given text as if the user typed it.
    Message(String),
    /// Sends a postback payload (see `postback`).
    Postback(String),
}

impl QuickReply {
    pub fn message(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: QuickAction::Message(text.into()),
        }
    }

    pub fn postback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: QuickAction::Postback(data.into()),
        }
    }
}
