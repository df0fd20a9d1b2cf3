//! Campus query bot: keyword routing, NLU dispatch and the LINE webhook
//! server.
//!
//! The binary (`main.rs`) and `cq-e2e-tests` both build on the types
//! re-exported here.

pub mod catalog;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod keyword;
pub mod mock;
pub mod modules;
pub mod rank;
pub mod router;
pub mod routes;
pub mod sink;
pub mod state;
pub mod telemetry;

pub use catalog::DataSources;
pub use config::BotConfig;
pub use context::MessageContext;
pub use dispatcher::Dispatcher;
pub use error::{ApiError, BotError, DispatchError};
pub use routes::build_router;
pub use sink::{LineReplyClient, LogReplySink, ReplySink};
pub use state::AppState;
pub use telemetry::{Telemetry, TelemetrySnapshot};
