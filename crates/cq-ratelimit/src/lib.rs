//! Keyed rate limiting for the campus query bot.
//!
//! Each key (a chat identity) owns a token bucket for burst control and,
//! optionally, a daily counter that resets at local midnight in
//! Asia/Taipei. State is created lazily on the first `allow` and reclaimed
//! by a background janitor once idle.

pub mod bucket;
pub mod clock;
pub mod daily;
pub mod keyed;
pub mod mock;

pub use clock::{Clock, SystemClock};
pub use keyed::{KeyedConfig, KeyedLimiter, UsageStats};
pub use mock::ManualClock;
