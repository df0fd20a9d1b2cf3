//! Keyed limiter: one token bucket (plus optional daily counter) per key.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bucket::TokenBucket;
use crate::clock::{Clock, SystemClock};
use crate::daily::DailyCounter;

/// Sentinel reported for daily fields when the daily cap is disabled.
pub const DAILY_DISABLED: i64 = -1;

/// Limiter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedConfig {
    /// Bucket capacity (maximum burst).
    pub burst: u32,
    /// Tokens credited per second.
    pub refill_rate: f64,
    /// Uses allowed per Asia/Taipei calendar day. 0 disables the cap.
    #[serde(default)]
    pub daily_limit: u32,
    /// Keys idle longer than this are reclaimed by the janitor.
    #[serde(default = "default_idle_ttl", with = "secs")]
    pub idle_ttl: Duration,
    /// Upper bound on resident keys.
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,
}

fn default_idle_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_max_keys() -> usize {
    10_000
}

impl KeyedConfig {
    pub fn new(burst: u32, refill_rate: f64) -> Self {
        Self {
            burst,
            refill_rate,
            daily_limit: 0,
            idle_ttl: default_idle_ttl(),
            max_keys: default_max_keys(),
        }
    }

    pub fn with_daily_limit(mut self, limit: u32) -> Self {
        self.daily_limit = limit;
        self
    }

    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys.max(1);
        self
    }

    pub fn daily_enabled(&self) -> bool {
        self.daily_limit > 0
    }
}

/// Snapshot of one key's quota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub burst_available: f64,
    pub burst_max: f64,
    /// Tokens per second.
    pub burst_refill_rate: f64,
    /// `DAILY_DISABLED` when the daily cap is off.
    pub daily_remaining: i64,
    /// `DAILY_DISABLED` when the daily cap is off.
    pub daily_max: i64,
}

impl UsageStats {
    pub fn daily_enabled(&self) -> bool {
        self.daily_max != DAILY_DISABLED
    }

    /// Whole tokens available right now.
    pub fn burst_whole(&self) -> u32 {
        self.burst_available.floor() as u32
    }

    /// Seconds until the next whole token, zero when one is available.
    pub fn secs_until_next_token(&self) -> Option<f64> {
        if self.burst_available >= 1.0 {
            return Some(0.0);
        }
        if self.burst_refill_rate <= 0.0 {
            return None;
        }
        Some((1.0 - self.burst_available) / self.burst_refill_rate)
    }
}

struct KeyState {
    bucket: TokenBucket,
    daily: Option<DailyCounter>,
    last_seen: DateTime<Utc>,
}

impl KeyState {
    fn new(config: &KeyedConfig, now: DateTime<Utc>) -> Self {
        Self {
            bucket: TokenBucket::new(config.burst, config.refill_rate, now),
            daily: config
                .daily_enabled()
                .then(|| DailyCounter::new(config.daily_limit, now)),
            last_seen: now,
        }
    }

    fn refresh(&mut self, now: DateTime<Utc>) {
        self.bucket.refill(now);
        if let Some(daily) = self.daily.as_mut() {
            daily.roll(now);
        }
    }

    /// Take one token (and one daily use) if both are available.
    fn admit(&mut self, now: DateTime<Utc>) -> bool {
        self.last_seen = now;
        self.refresh(now);

        let daily_ok = self.daily.as_ref().is_none_or(DailyCounter::has_quota);
        if !daily_ok || !self.bucket.has_token(now) {
            return false;
        }

        self.bucket.consume();
        if let Some(daily) = self.daily.as_mut() {
            daily.consume();
        }
        true
    }

    fn stats(&self) -> UsageStats {
        let (daily_remaining, daily_max) = match &self.daily {
            Some(d) => (i64::from(d.remaining()), i64::from(d.limit())),
            None => (DAILY_DISABLED, DAILY_DISABLED),
        };
        UsageStats {
            burst_available: self.bucket.available(),
            burst_max: self.bucket.capacity(),
            burst_refill_rate: self.bucket.refill_rate(),
            daily_remaining,
            daily_max,
        }
    }

    /// Idle past the TTL, and dropping the state would not hand back
    /// daily quota already spent today.
    fn is_reclaimable(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let idle = (now - self.last_seen).to_std().unwrap_or_default();
        if idle < ttl {
            return false;
        }
        match &self.daily {
            Some(d) => d.used() == 0 || d.is_stale(now),
            None => true,
        }
    }
}

/// Concurrent keyed rate limiter.
///
/// Keys are sharded across a `DashMap`; each `allow` holds one shard lock
/// for a few arithmetic operations and never across an await point.
/// A bounded LRU index over the same keys picks the eviction victim when
/// `max_keys` is reached. The index lock is never taken while a shard
/// guard is held.
pub struct KeyedLimiter {
    name: String,
    config: KeyedConfig,
    clock: Arc<dyn Clock>,
    entries: DashMap<String, KeyState>,
    recency: Mutex<LruCache<String, ()>>,
}

impl KeyedLimiter {
    /// A limiter on the system clock. `name` labels log lines.
    pub fn new(name: impl Into<String>, config: KeyedConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    pub fn with_clock(name: impl Into<String>, config: KeyedConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(config.max_keys).unwrap_or(NonZeroUsize::MIN);
        Self {
            name: name.into(),
            config,
            clock,
            entries: DashMap::new(),
            recency: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &KeyedConfig {
        &self.config
    }

    /// Try to spend one unit of quota for `key`.
    pub fn allow(&self, key: &str) -> bool {
        let now = self.clock.now();

        let known = self.entries.get_mut(key).map(|mut state| state.admit(now));
        if let Some(allowed) = known {
            self.recency().promote(key);
            return self.log_decision(key, allowed);
        }

        self.make_room(key);
        let allowed = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| KeyState::new(&self.config, now))
            .admit(now);
        self.log_decision(key, allowed)
    }

    /// Current quota for `key`. Unknown keys report a full quota without
    /// creating state.
    pub fn usage_stats(&self, key: &str) -> UsageStats {
        let now = self.clock.now();
        match self.entries.get_mut(key) {
            Some(mut state) => {
                state.refresh(now);
                state.stats()
            }
            None => KeyState::new(&self.config, now).stats(),
        }
    }

    /// Number of resident keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop keys idle longer than the configured TTL. Returns how many
    /// were removed.
    pub fn evict_idle(&self) -> usize {
        let now = self.clock.now();
        let mut reclaimed = Vec::new();
        self.entries.retain(|key, state| {
            let keep = !state.is_reclaimable(now, self.config.idle_ttl);
            if !keep {
                reclaimed.push(key.clone());
            }
            keep
        });
        let evicted = reclaimed.len();
        if evicted > 0 {
            let mut recency = self.recency();
            for key in &reclaimed {
                recency.pop(key);
            }
            drop(recency);
            tracing::debug!(limiter = %self.name, evicted, remaining = self.entries.len(), "evicted idle keys");
        }
        evicted
    }

    /// Run `evict_idle` every `interval` until `shutdown` fires.
    pub fn spawn_janitor(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        limiter.evict_idle();
                    }
                    () = shutdown.cancelled() => {
                        tracing::debug!(limiter = %limiter.name, "janitor stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Register `incoming` in the recency index, reclaiming the least
    /// recently seen key when the index is full.
    fn make_room(&self, incoming: &str) {
        let displaced = self.recency().push(incoming.to_string(), ());
        if let Some((oldest, ())) = displaced.filter(|(k, _)| k != incoming) {
            self.entries.remove(&oldest);
            tracing::debug!(limiter = %self.name, evicted = %oldest, incoming = %incoming, "key capacity reached, evicted LRU key");
        }
    }

    fn recency(&self) -> MutexGuard<'_, LruCache<String, ()>> {
        self.recency
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn log_decision(&self, key: &str, allowed: bool) -> bool {
        if !allowed {
            tracing::debug!(limiter = %self.name, key = %key, "rate limited");
        }
        allowed
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ManualClock;
    use chrono::TimeZone;

    fn limiter(config: KeyedConfig) -> (Arc<ManualClock>, KeyedLimiter) {
        let clock = Arc::new(ManualClock::at_taipei_morning());
        let limiter = KeyedLimiter::with_clock("test", config, clock.clone());
        (clock, limiter)
    }

    #[test]
    fn burst_then_deny_at_zero_elapsed() {
        let (_clock, limiter) = limiter(KeyedConfig::new(3, 1.0));
        assert!(limiter.allow("chat-a"));
        assert!(limiter.allow("chat-a"));
        assert!(limiter.allow("chat-a"));
        assert!(!limiter.allow("chat-a"));
    }

    #[test]
    fn keys_are_independent() {
        let (_clock, limiter) = limiter(KeyedConfig::new(1, 0.0));
        assert!(limiter.allow("chat-a"));
        assert!(!limiter.allow("chat-a"));
        assert!(limiter.allow("chat-b"));
    }

    #[test]
    fn refill_restores_tokens() {
        let (clock, limiter) = limiter(KeyedConfig::new(2, 0.5));
        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));

        clock.advance(Duration::from_secs(1));
        assert!(!limiter.allow("k"), "half a token is not enough");

        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow("k"));
    }

    #[test]
    fn daily_cap_blocks_even_with_tokens() {
        let (clock, limiter) = limiter(KeyedConfig::new(5, 100.0).with_daily_limit(2));
        assert!(limiter.allow("k"));
        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow("k"));
        clock.advance(Duration::from_secs(1));
        assert!(!limiter.allow("k"));

        let stats = limiter.usage_stats("k");
        assert_eq!(stats.daily_remaining, 0);
        assert_eq!(stats.daily_max, 2);
        assert_eq!(stats.burst_available, 5.0);
    }

    #[test]
    fn daily_cap_resets_at_taipei_midnight() {
        let (clock, limiter) = limiter(KeyedConfig::new(5, 100.0).with_daily_limit(1));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));

        clock.set(Utc.with_ymd_and_hms(2024, 9, 2, 16, 0, 1).unwrap());
        assert!(limiter.allow("k"));
    }

    #[test]
    fn denied_call_spends_nothing() {
        let (_clock, limiter) = limiter(KeyedConfig::new(1, 0.0).with_daily_limit(10));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
        assert!(!limiter.allow("k"));
        assert_eq!(limiter.usage_stats("k").daily_remaining, 9);
    }

    #[test]
    fn unknown_key_reports_full_quota_without_state() {
        let (_clock, limiter) = limiter(KeyedConfig::new(4, 0.25).with_daily_limit(20));
        let stats = limiter.usage_stats("new-user");
        assert_eq!(stats.burst_available, 4.0);
        assert_eq!(stats.burst_max, 4.0);
        assert_eq!(stats.burst_refill_rate, 0.25);
        assert_eq!(stats.daily_remaining, 20);
        assert_eq!(stats.daily_max, 20);
        assert!(limiter.is_empty());
    }

    #[test]
    fn disabled_daily_reports_sentinel() {
        let (_clock, limiter) = limiter(KeyedConfig::new(2, 1.0));
        limiter.allow("k");
        let stats = limiter.usage_stats("k");
        assert_eq!(stats.daily_remaining, DAILY_DISABLED);
        assert_eq!(stats.daily_max, DAILY_DISABLED);
        assert!(!stats.daily_enabled());
    }

    #[test]
    fn stats_never_exceed_capacity() {
        let (clock, limiter) = limiter(KeyedConfig::new(3, 2.0));
        limiter.allow("k");
        clock.advance(Duration::from_secs(3600));
        let stats = limiter.usage_stats("k");
        assert!(stats.burst_available <= stats.burst_max);
        assert_eq!(stats.secs_until_next_token(), Some(0.0));
    }

    #[test]
    fn secs_until_next_token_when_empty() {
        let (_clock, limiter) = limiter(KeyedConfig::new(1, 0.5));
        limiter.allow("k");
        let wait = limiter.usage_stats("k").secs_until_next_token().unwrap();
        assert!((wait - 2.0).abs() < 1e-9);
    }

    #[test]
    fn evicts_idle_keys() {
        let (clock, limiter) =
            limiter(KeyedConfig::new(2, 1.0).with_idle_ttl(Duration::from_secs(60)));
        limiter.allow("idle");
        clock.advance(Duration::from_secs(30));
        limiter.allow("active");
        clock.advance(Duration::from_secs(31));

        assert_eq!(limiter.evict_idle(), 1);
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.usage_stats("active").burst_available, 2.0);
    }

    #[test]
    fn idle_key_with_spent_daily_quota_is_kept_until_next_day() {
        let (clock, limiter) = limiter(
            KeyedConfig::new(2, 1.0)
                .with_daily_limit(3)
                .with_idle_ttl(Duration::from_secs(60)),
        );
        limiter.allow("k");
        clock.advance(Duration::from_secs(120));
        assert_eq!(limiter.evict_idle(), 0);

        clock.set(Utc.with_ymd_and_hms(2024, 9, 3, 2, 0, 0).unwrap());
        assert_eq!(limiter.evict_idle(), 1);
    }

    #[test]
    fn capacity_reclaims_least_recently_seen() {
        let (clock, limiter) = limiter(KeyedConfig::new(1, 0.0).with_max_keys(2));
        limiter.allow("first");
        clock.advance(Duration::from_secs(1));
        limiter.allow("second");
        clock.advance(Duration::from_secs(1));
        limiter.allow("third");

        assert_eq!(limiter.len(), 2);
        // "first" was reclaimed, so it is a new user again.
        assert!(limiter.allow("first"));
        assert!(!limiter.allow("third"));
    }

    #[test]
    fn capacity_follows_use_not_creation() {
        let (clock, limiter) = limiter(KeyedConfig::new(1, 0.0).with_max_keys(2));
        limiter.allow("first");
        clock.advance(Duration::from_secs(1));
        limiter.allow("second");
        clock.advance(Duration::from_secs(1));
        // Denied, but still a use.
        assert!(!limiter.allow("first"));
        clock.advance(Duration::from_secs(1));
        limiter.allow("third");

        assert_eq!(limiter.len(), 2);
        assert!(!limiter.allow("first"));
        assert!(limiter.allow("second"), "second was reclaimed");
    }

    #[test]
    fn idle_eviction_frees_capacity() {
        let (clock, limiter) = limiter(
            KeyedConfig::new(1, 0.0)
                .with_max_keys(2)
                .with_idle_ttl(Duration::from_secs(60)),
        );
        limiter.allow("idle");
        clock.advance(Duration::from_secs(30));
        limiter.allow("active");
        clock.advance(Duration::from_secs(31));
        assert_eq!(limiter.evict_idle(), 1);

        limiter.allow("newcomer");
        assert_eq!(limiter.len(), 2);
        assert!(!limiter.allow("active"), "active kept its spent bucket");
    }

    #[test]
    fn many_keys_stay_bounded() {
        let (clock, limiter) = limiter(KeyedConfig::new(1, 0.0).with_max_keys(100));
        for i in 0..5_000 {
            limiter.allow(&format!("chat-{i}"));
            clock.advance(Duration::from_millis(1));
        }
        assert_eq!(limiter.len(), 100);
        assert!(!limiter.allow("chat-4999"));
        assert!(limiter.allow("chat-0"));
    }

    #[tokio::test]
    async fn concurrent_callers_never_exceed_burst() {
        let clock = Arc::new(ManualClock::at_taipei_morning());
        let limiter = Arc::new(KeyedLimiter::with_clock(
            "concurrent",
            KeyedConfig::new(10, 0.0),
            clock,
        ));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.allow("shared") }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn janitor_evicts_and_stops() {
        let clock = Arc::new(ManualClock::at_taipei_morning());
        let limiter = Arc::new(KeyedLimiter::with_clock(
            "janitor",
            KeyedConfig::new(1, 1.0).with_idle_ttl(Duration::from_secs(10)),
            clock.clone(),
        ));
        limiter.allow("k");
        clock.advance(Duration::from_secs(11));

        let shutdown = CancellationToken::new();
        let handle = limiter.spawn_janitor(Duration::from_secs(5), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(limiter.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: KeyedConfig =
            serde_json::from_str(r#"{"burst": 5, "refill_rate": 0.1}"#).unwrap();
        assert_eq!(config.daily_limit, 0);
        assert_eq!(config.idle_ttl, Duration::from_secs(3600));
        assert_eq!(config.max_keys, 10_000);
    }
}
