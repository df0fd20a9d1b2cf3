//! Token bucket with continuous refill.

use chrono::{DateTime, Utc};

/// A token bucket refilled continuously at `refill_rate` tokens per second.
///
/// `tokens` never exceeds `capacity` and never drops below zero.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(capacity: u32, refill_rate: f64, now: DateTime<Utc>) -> Self {
        let capacity = f64::from(capacity);
        Self {
            tokens: capacity,
            capacity,
            refill_rate: refill_rate.max(0.0),
            last_refill: now,
        }
    }

    /// Credit tokens for the time elapsed since the last refill.
    ///
    /// A clock that moves backwards credits nothing.
    pub fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed = elapsed_secs(self.last_refill, now);
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Whether a whole token is available (after refilling).
    pub fn has_token(&mut self, now: DateTime<Utc>) -> bool {
        self.refill(now);
        self.tokens >= 1.0
    }

    /// Remove one token. Callers check `has_token` first.
    pub fn consume(&mut self) {
        self.tokens = (self.tokens - 1.0).max(0.0);
    }

    pub fn available(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// True when the bucket holds its full capacity.
    pub fn is_full(&self) -> bool {
        self.tokens >= self.capacity
    }
}

fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        // Overflow only happens for spans of centuries; treat as "very long".
        None => delta.num_seconds() as f64,
    }
}
