//! Shared types for the campus query bot.
//!
//! Used by the LLM crate (which produces `ParseResult`), the bot crate
//! (which routes messages and renders `Reply` values) and the e2e tests.

pub mod error;
pub mod intent;
pub mod postback;
pub mod reply;

pub use error::{ProtocolError, ProtocolResult};
pub use intent::{DIRECT_REPLY_MODULE, Params, ParseResult};
pub use postback::Postback;
pub use reply::{MAX_QUICK_REPLIES, QuickAction, QuickReply, Reply};
