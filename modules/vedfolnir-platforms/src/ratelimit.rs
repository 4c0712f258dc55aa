use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};
use rand::Rng;
use vedfolnir_common::types::PlatformType;

/// The endpoint family a request belongs to. Rate limit buckets are keyed
/// by `(platform_type, endpoint_family)`; media endpoints are throttled
/// lower than timeline reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointFamily {
    Timeline,
    Media,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitDefaults {
    pub timeline_per_window: u32,
    pub media_per_window: u32,
    pub window: Duration,
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        Self {
            timeline_per_window: 300,
            media_per_window: 30,
            window: Duration::from_secs(300),
        }
    }
}

type Bucket = Governor<NotKeyed, InMemoryState, DefaultClock>;

/// Token-bucket limiter keyed by `(PlatformType, EndpointFamily)`. A server
/// response's `X-RateLimit-*` headers override local state for that key
/// whenever present.
pub struct RateLimiter {
    defaults: RateLimitDefaults,
    buckets: Mutex<HashMap<(PlatformType, EndpointFamily), Arc<Bucket>>>,
    server_overrides: Mutex<HashMap<(PlatformType, EndpointFamily), ServerOverride>>,
}

struct ServerOverride {
    remaining: u32,
    reset_at: chrono::DateTime<chrono::Utc>,
}

impl RateLimiter {
    pub fn new(defaults: RateLimitDefaults) -> Self {
        Self {
            defaults,
            buckets: Mutex::new(HashMap::new()),
            server_overrides: Mutex::new(HashMap::new()),
        }
    }

    fn bucket_for(&self, platform: PlatformType, family: EndpointFamily) -> Arc<Bucket> {
        let mut buckets = self.buckets.lock().expect("ratelimit bucket lock poisoned");
        buckets
            .entry((platform, family))
            .or_insert_with(|| {
                let per_window = match family {
                    EndpointFamily::Timeline => self.defaults.timeline_per_window,
                    EndpointFamily::Media => self.defaults.media_per_window,
                };
                let quota = Quota::with_period(self.defaults.window / per_window.max(1))
                    .expect("non-zero window")
                    .allow_burst(NonZeroU32::new(per_window.max(1)).expect("non-zero burst"));
                Arc::new(Governor::direct(quota))
            })
            .clone()
    }

    /// Blocks until a token is available, honouring any active server
    /// override for this key first.
    pub async fn acquire(&self, platform: PlatformType, family: EndpointFamily) {
        if let Some(wait) = self.server_override_wait(platform, family) {
            tokio::time::sleep(wait).await;
        }
        let bucket = self.bucket_for(platform, family);
        bucket.until_ready().await;
    }

    fn server_override_wait(
        &self,
        platform: PlatformType,
        family: EndpointFamily,
    ) -> Option<Duration> {
        let overrides = self
            .server_overrides
            .lock()
            .expect("ratelimit override lock poisoned");
        let entry = overrides.get(&(platform, family))?;
        if entry.remaining > 0 {
            return None;
        }
        let now = chrono::Utc::now();
        if entry.reset_at <= now {
            return None;
        }
        Some((entry.reset_at - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Records a server's rate-limit headers, overriding local bucket state
    /// for this key until `reset_at`.
    pub fn record_server_state(
        &self,
        platform: PlatformType,
        family: EndpointFamily,
        remaining: u32,
        reset_at: chrono::DateTime<chrono::Utc>,
    ) {
        let mut overrides = self
            .server_overrides
            .lock()
            .expect("ratelimit override lock poisoned");
        overrides.insert((platform, family), ServerOverride { remaining, reset_at });
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryStatsSnapshot {
    pub attempts: u64,
    pub retries: u64,
    pub wins_after_retry: u64,
    pub total_wait_ms: u64,
}

/// Attempts/wins/cumulative-wait counters, kept globally and per-platform
/// for observability.
#[derive(Default)]
pub struct RetryStats {
    attempts: AtomicU64,
    retries: AtomicU64,
    wins_after_retry: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl RetryStats {
    pub fn snapshot(&self) -> RetryStatsSnapshot {
        RetryStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            wins_after_retry: self.wins_after_retry.load(Ordering::Relaxed),
            total_wait_ms: self.total_wait_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// `delay = min(max_delay, base * factor^attempt)` with optional full
    /// jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let raw = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let delay = if self.jitter {
            rand::thread_rng().gen_range(0.0..=capped)
        } else {
            capped
        };
        Duration::from_secs_f64(delay.max(0.0))
    }

    /// Runs `f` up to `max_attempts` times, retrying only on errors for
    /// which `is_retryable` returns true and honouring `retry_after` (e.g.
    /// from a 429's `Retry-After` header) when the attempt provides one.
    pub async fn run<F, Fut, T, E>(
        &self,
        stats: &RetryStats,
        is_retryable: impl Fn(&E) -> bool,
        retry_after: impl Fn(&E) -> Option<Duration>,
        mut f: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            stats.attempts.fetch_add(1, Ordering::Relaxed);
            match f(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        stats.wins_after_retry.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(value);
                }
                Err(err) if attempt + 1 < self.max_attempts && is_retryable(&err) => {
                    let wait = retry_after(&err).unwrap_or_else(|| self.backoff(attempt));
                    stats.retries.fetch_add(1, Ordering::Relaxed);
                    stats
                        .total_wait_ms
                        .fetch_add(wait.as_millis() as u64, Ordering::Relaxed);
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped_at_max_delay() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            jitter: false,
        };
        assert_eq!(policy.backoff(10), Duration::from_secs(5));
    }

    #[test]
    fn backoff_grows_exponentially_without_jitter() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: false,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn run_retries_retryable_errors_then_succeeds() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 1.0,
            jitter: false,
        };
        let stats = RetryStats::default();
        let mut calls = 0;
        let result: Result<&str, &str> = policy
            .run(
                &stats,
                |_| true,
                |_| None,
                |attempt| {
                    calls += 1;
                    async move {
                        if attempt < 2 {
                            Err("transient")
                        } else {
                            Ok("ok")
                        }
                    }
                },
            )
            .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls, 3);
        assert_eq!(stats.snapshot().wins_after_retry, 1);
    }

    #[tokio::test]
    async fn run_stops_on_non_retryable_error() {
        let policy = RetryPolicy::default();
        let stats = RetryStats::default();
        let mut calls = 0;
        let result: Result<&str, &str> = policy
            .run(
                &stats,
                |_| false,
                |_| None,
                |_| {
                    calls += 1;
                    async { Err("permanent") }
                },
            )
            .await;
        assert_eq!(result, Err("permanent"));
        assert_eq!(calls, 1);
    }
}
