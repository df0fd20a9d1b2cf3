//! Per-message state handed to module handlers.

use std::sync::Arc;

use cq_llm::CallContext;

use crate::telemetry::Telemetry;

/// Who sent the message, plus the deadline/cancellation for any external
/// call made while answering it.
#[derive(Debug, Clone)]
pub struct MessageContext {
    /// Reply target: group or room id, else the user id.
    pub chat_id: String,
    pub user_id: String,
    pub call: CallContext,
    pub telemetry: Arc<Telemetry>,
}

impl MessageContext {
    pub fn new(
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
        call: CallContext,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            call,
            telemetry,
        }
    }

    /// Record a postback that cannot be acted on. The caller replies with
    /// nothing.
    pub fn malformed_postback(&self, module: &str, data: &str, reason: &str) {
        self.telemetry.malformed_postback();
        tracing::warn!(
            chat_id = %self.chat_id,
            module,
            data,
            reason,
            "dropping malformed postback"
        );
    }
}
