//! Outbound reply transport.

use std::time::Duration;

use async_trait::async_trait;
use cq_protocol::{QuickAction, QuickReply, Reply};
use serde_json::{Value, json};

use crate::error::SinkError;

/// The reply API accepts at most this many messages per reply token.
pub const MAX_MESSAGES_PER_REPLY: usize = 5;

pub const DEFAULT_LINE_API_BASE: &str = "https://api.line.me";

/// Where replies for one inbound event go.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send(
        &self,
        reply_token: &str,
        chat_id: &str,
        replies: &[Reply],
    ) -> Result<(), SinkError>;
}

/// LINE Messaging API reply client.
pub struct LineReplyClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl LineReplyClient {
    pub fn new(
        access_token: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }
}

#[async_trait]
impl ReplySink for LineReplyClient {
    async fn send(
        &self,
        reply_token: &str,
        chat_id: &str,
        replies: &[Reply],
    ) -> Result<(), SinkError> {
        if replies.is_empty() {
            return Ok(());
        }
        if replies.len() > MAX_MESSAGES_PER_REPLY {
            tracing::warn!(
                chat_id,
                count = replies.len(),
                "dropping replies over the per-token limit"
            );
        }

        let messages: Vec<Value> = replies
            .iter()
            .take(MAX_MESSAGES_PER_REPLY)
            .map(line_message)
            .collect();
        let body = json!({ "replyToken": reply_token, "messages": messages });

        let response = self
            .client
            .post(format!("{}/v2/bot/message/reply", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SinkError::Http {
                status: status.as_u16(),
                message: message.chars().take(300).collect(),
            });
        }
        tracing::debug!(chat_id, count = messages.len(), "reply sent");
        Ok(())
    }
}

/// Logs replies instead of sending them; used when no access token is set.
pub struct LogReplySink;

#[async_trait]
impl ReplySink for LogReplySink {
    async fn send(
        &self,
        _reply_token: &str,
        chat_id: &str,
        replies: &[Reply],
    ) -> Result<(), SinkError> {
        for reply in replies {
            tracing::info!(chat_id, reply = %reply.summary(), "reply (not sent)");
        }
        Ok(())
    }
}

fn quick_reply_item(quick: &QuickReply) -> Value {
    let action = match &quick.action {
        QuickAction::Message(text) => {
            json!({ "type": "message", "label": quick.label, "text": text })
        }
        QuickAction::Postback(data) => json!({
            "type": "postback",
            "label": quick.label,
            "data": data,
            "displayText": quick.label,
        }),
    };
    json!({ "type": "action", "action": action })
}

/// LINE wire format of one reply.
pub fn line_message(reply: &Reply) -> Value {
    match reply {
        Reply::Text { text, quick_replies } => {
            let mut message = json!({ "type": "text", "text": text });
            if !quick_replies.is_empty() {
                let items: Vec<Value> = quick_replies.iter().map(quick_reply_item).collect();
                message["quickReply"] = json!({ "items": items });
            }
            message
        }
        Reply::Flex { alt_text, contents } => {
            json!({ "type": "flex", "altText": alt_text, "contents": contents })
        }
        Reply::Template { alt_text, template } => {
            json!({ "type": "template", "altText": alt_text, "template": template })
        }
        Reply::Image {
            original_url,
            preview_url,
        } => json!({
            "type": "image",
            "originalContentUrl": original_url,
            "previewImageUrl": preview_url,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> LineReplyClient {
        LineReplyClient::new("token-123", base, Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn text_with_quick_replies_wire_format() {
        let reply = Reply::text_with_quick_replies(
            "hi",
            vec![
                QuickReply::message("說明", "help"),
                QuickReply::postback("緊急", "contact:emergency"),
            ],
        );
        let msg = line_message(&reply);
        assert_eq!(msg["type"], "text");
        let items = msg["quickReply"]["items"].as_array().unwrap();
        assert_eq!(items[0]["action"]["type"], "message");
        assert_eq!(items[1]["action"]["data"], "contact:emergency");
    }

    #[test]
    fn plain_text_has_no_quick_reply() {
        assert!(line_message(&Reply::text("x")).get("quickReply").is_none());
    }

    #[tokio::test]
    async fn posts_reply_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/bot/message/reply"))
            .and(header("authorization", "Bearer token-123"))
            .and(body_partial_json(json!({ "replyToken": "rt-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server.uri())
            .send("rt-1", "C1", &[Reply::text("hello")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn caps_message_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let replies: Vec<Reply> = (0..7).map(|i| Reply::text(format!("m{i}"))).collect();
        client(&server.uri()).send("rt", "C1", &replies).await.unwrap();

        let received = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body["messages"].as_array().unwrap().len(), MAX_MESSAGES_PER_REPLY);
    }

    #[tokio::test]
    async fn http_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Invalid reply token"))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .send("expired", "C1", &[Reply::text("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Http { status: 400, .. }));
    }

    #[tokio::test]
    async fn empty_replies_skip_the_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        client(&server.uri()).send("rt", "C1", &[]).await.unwrap();
    }
}
