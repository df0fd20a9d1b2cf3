//! LINE webhook endpoint.
//!
//! The platform expects a fast 200, so events are handled on their own
//! tasks after the body is accepted.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookBody {
    #[serde(default)]
    pub destination: String,
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub reply_token: Option<String>,
    #[serde(default)]
    pub source: EventSource,
    #[serde(default)]
    pub message: Option<EventMessage>,
    #[serde(default)]
    pub postback: Option<EventPostback>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
}

impl EventSource {
    /// Group or room when present, else the user.
    pub fn chat_id(&self) -> Option<&str> {
        self.group_id
            .as_deref()
            .or(self.room_id.as_deref())
            .or(self.user_id.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventPostback {
    pub data: String,
}

/// What the dispatcher should do with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Inbound {
    Text(String),
    Postback(String),
}

impl WebhookEvent {
    fn inbound(&self) -> Option<Inbound> {
        match self.kind.as_str() {
            "message" => {
                let message = self.message.as_ref()?;
                if message.kind != "text" {
                    return None;
                }
                message.text.clone().map(Inbound::Text)
            }
            "postback" => self.postback.as_ref().map(|p| Inbound::Postback(p.data.clone())),
            _ => None,
        }
    }
}

/// POST /callback: accept a webhook delivery.
pub async fn callback(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let body: WebhookBody = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid webhook body: {e}")))?;

    let accepted = body.events.len();
    tracing::debug!(destination = %body.destination, events = accepted, "webhook received");

    for event in body.events {
        let request_id = Uuid::now_v7();
        let span = tracing::info_span!("event", %request_id, kind = %event.kind);
        tokio::spawn(handle_event(state.clone(), event).instrument(span));
    }

    Ok(Json(json!({ "status": "ok", "accepted": accepted })))
}

async fn handle_event(state: AppState, event: WebhookEvent) {
    let Some(inbound) = event.inbound() else {
        tracing::debug!("ignoring unsupported event");
        return;
    };
    let Some(chat_id) = event.source.chat_id() else {
        tracing::warn!("event without a source, dropping");
        return;
    };
    let user_id = event.source.user_id.as_deref().unwrap_or_default();

    let replies = match &inbound {
        Inbound::Text(text) => state.dispatcher.on_text(chat_id, user_id, text).await,
        Inbound::Postback(data) => state.dispatcher.on_postback(chat_id, user_id, data).await,
    };
    if replies.is_empty() {
        return;
    }
    let Some(reply_token) = event.reply_token.as_deref() else {
        tracing::warn!(chat_id, "no reply token, dropping replies");
        return;
    };

    if let Err(err) = state.sink.send(reply_token, chat_id, &replies).await {
        state.dispatcher.telemetry().send_failure();
        tracing::warn!(chat_id, error = %err, "failed to send reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(raw: Value) -> WebhookEvent {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn text_message_event() {
        let ev = event(json!({
            "type": "message",
            "replyToken": "rt",
            "source": { "type": "user", "userId": "U1" },
            "message": { "type": "text", "id": "1", "text": "help" }
        }));
        assert_eq!(ev.inbound(), Some(Inbound::Text("help".into())));
        assert_eq!(ev.source.chat_id(), Some("U1"));
    }

    #[test]
    fn group_source_prefers_group_id() {
        let ev = event(json!({
            "type": "postback",
            "source": { "type": "group", "groupId": "G1", "userId": "U1" },
            "postback": { "data": "contact:emergency" }
        }));
        assert_eq!(ev.inbound(), Some(Inbound::Postback("contact:emergency".into())));
        assert_eq!(ev.source.chat_id(), Some("G1"));
    }

    #[test]
    fn non_text_events_are_ignored() {
        let sticker = event(json!({
            "type": "message",
            "source": { "userId": "U1" },
            "message": { "type": "sticker" }
        }));
        assert_eq!(sticker.inbound(), None);
        let follow = event(json!({ "type": "follow", "source": { "userId": "U1" } }));
        assert_eq!(follow.inbound(), None);
    }
}
