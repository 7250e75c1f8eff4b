//! Per-key and overall rate limiters deciding how long a requeue waits.

use std::hash::Hash;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::time::Instant;

/// Decides the delay before a failed key is handed out again.
pub trait RateLimiter<K>: Send {
    /// Delay for the next requeue of `key`; records one more failure.
    fn when(&mut self, key: &K) -> Duration;
    /// Clear failure tracking for `key`.
    fn forget(&mut self, key: &K);
    /// Consecutive failures recorded for `key` since the last `forget`.
    fn num_requeues(&self, key: &K) -> u32;
}

/// `base * 2^failures`, capped at `max`.
pub struct ItemExponential<K> {
    base: Duration,
    max: Duration,
    failures: FxHashMap<K, u32>,
}

impl<K> ItemExponential<K> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, failures: FxHashMap::default() }
    }
}

impl<K: Eq + Hash + Clone + Send> RateLimiter<K> for ItemExponential<K> {
    fn when(&mut self, key: &K) -> Duration {
        let slot = self.failures.entry(key.clone()).or_insert(0);
        let exp = *slot;
        *slot = slot.saturating_add(1);
        match 1u32.checked_shl(exp).and_then(|factor| self.base.checked_mul(factor)) {
            Some(backoff) if backoff < self.max => backoff,
            _ => self.max,
        }
    }

    fn forget(&mut self, key: &K) {
        self.failures.remove(key);
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}

/// Overall token bucket shared by all keys: `rate` tokens per second, up to `burst`.
/// Tokens may go negative; the deficit is the wait.
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    pub fn new(rate: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self { rate, burst, tokens: burst, last: Instant::now() }
    }
}

impl<K> RateLimiter<K> for TokenBucket {
    fn when(&mut self, _key: &K) -> Duration {
        if self.rate <= 0.0 {
            return Duration::ZERO;
        }
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.rate)
        }
    }

    fn forget(&mut self, _key: &K) {}

    fn num_requeues(&self, _key: &K) -> u32 { 0 }
}

/// Combines limiters: the longest delay and highest requeue count win.
pub struct MaxOf<K> {
    limiters: Vec<Box<dyn RateLimiter<K>>>,
}

impl<K> MaxOf<K> {
    pub fn new(limiters: Vec<Box<dyn RateLimiter<K>>>) -> Self { Self { limiters } }
}

impl<K> RateLimiter<K> for MaxOf<K> {
    fn when(&mut self, key: &K) -> Duration {
        self.limiters.iter_mut().map(|l| l.when(key)).max().unwrap_or(Duration::ZERO)
    }

    fn forget(&mut self, key: &K) {
        for l in self.limiters.iter_mut() {
            l.forget(key);
        }
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.limiters.iter().map(|l| l.num_requeues(key)).max().unwrap_or(0)
    }
}

/// 5ms..1000s per-key exponential backoff, bounded overall by 10 qps with a burst of 100.
pub fn default_controller_limiter<K>() -> MaxOf<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    MaxOf::new(vec![
        Box::new(ItemExponential::new(Duration::from_millis(5), Duration::from_secs(1000))),
        Box::new(TokenBucket::new(10.0, 100)),
    ])
}
