//! Bounded retry with full-jitter exponential backoff.
//!
//! Attempt `n` (0-indexed) that fails with a transient error sleeps for a
//! duration drawn uniformly from `[0, min(cap, base * 2^n))` before the
//! next attempt. Permanent and canceled errors return immediately.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::context::CallContext;
use crate::error::{ErrorClass, LlmError, LlmResult};

/// Retry budget and backoff bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub cap_delay: Duration,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}
fn default_cap_delay() -> Duration {
    Duration::from_secs(5)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            cap_delay: default_cap_delay(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, cap_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            cap_delay,
        }
    }

    /// Exclusive upper bound of the jitter window after attempt `attempt`.
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.cap_delay)
    }
}

/// Runs operations under a `RetryPolicy`.
///
/// Holds its own RNG so a seeded retrier replays the same delays.
pub struct Retrier {
    policy: RetryPolicy,
    deadline_floor: Duration,
    rng: Mutex<StdRng>,
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::from_rng(policy, StdRng::from_entropy())
    }

    /// Deterministic jitter for reproducible runs.
    pub fn seeded(policy: RetryPolicy, seed: u64) -> Self {
        Self::from_rng(policy, StdRng::seed_from_u64(seed))
    }

    fn from_rng(policy: RetryPolicy, rng: StdRng) -> Self {
        Self {
            policy,
            deadline_floor: Duration::ZERO,
            rng: Mutex::new(rng),
        }
    }

    /// Refuse to start an attempt when less than `floor` remains before the
    /// context deadline.
    pub fn with_deadline_floor(mut self, floor: Duration) -> Self {
        self.deadline_floor = floor;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Draw the sleep that follows failed attempt `attempt`.
    pub fn jitter(&self, attempt: u32) -> Duration {
        let ceiling = self.policy.backoff_ceiling(attempt);
        let nanos = u64::try_from(ceiling.as_nanos()).unwrap_or(u64::MAX);
        if nanos == 0 {
            return Duration::ZERO;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Duration::from_nanos(rng.gen_range(0..nanos))
    }

    /// Call `op` until it succeeds, fails non-transiently, or the attempt
    /// budget runs out. `op` receives the 0-indexed attempt number.
    ///
    /// The last error is returned with its class intact.
    pub async fn run<T, F, Fut>(&self, ctx: &CallContext, label: &str, mut op: F) -> LlmResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = LlmResult<T>>,
    {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            ctx.ensure_can_start(self.deadline_floor)?;

            let result = tokio::select! {
                result = op(attempt) => result,
                () = ctx.cancelled() => Err(LlmError::Canceled),
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.class() != ErrorClass::Transient || attempt + 1 >= attempts {
                return Err(err);
            }

            let delay = self.jitter(attempt);
            tracing::warn!(
                call = %label,
                attempt = attempt + 1,
                max_attempts = attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "transient failure, backing off"
            );
            ctx.sleep(delay).await?;
            attempt += 1;
        }
    }
}
