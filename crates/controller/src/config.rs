//! Controller tuning, with `PORTICO_*` environment overrides.

use std::str::FromStr;
use std::time::Duration;

use portico_queue::{ItemExponential, MaxOf, TokenBucket, WorkQueue};

pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_QUEUE_NAME: &str = "ingress-manager";

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub queue_name: String,
    pub workers: usize,
    /// A failing key is requeued while its requeue count is `<=` this.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Overall requeue rate across all keys.
    pub qps: f64,
    pub burst: u32,
    /// Capacity of the notification channel between watchers and the dispatcher.
    pub notify_cap: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            workers: DEFAULT_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            qps: 10.0,
            burst: 100,
            notify_cap: 1024,
        }
    }
}

impl ControllerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `PORTICO_*` name.
    /// Unparseable values are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr, F: Fn(&str) -> Option<String>>(lookup: &F, name: &str) -> Option<T> {
            lookup(name).and_then(|s| s.trim().parse::<T>().ok())
        }

        let mut cfg = Self::default();
        if let Some(v) = parsed::<usize, _>(&lookup, "PORTICO_WORKERS") { cfg.workers = v.max(1); }
        if let Some(v) = parsed::<u32, _>(&lookup, "PORTICO_MAX_RETRIES") { cfg.max_retries = v; }
        if let Some(v) = parsed::<u64, _>(&lookup, "PORTICO_BASE_DELAY_MS") { cfg.base_delay = Duration::from_millis(v); }
        if let Some(v) = parsed::<u64, _>(&lookup, "PORTICO_MAX_DELAY_SECS") { cfg.max_delay = Duration::from_secs(v); }
        if let Some(v) = parsed::<f64, _>(&lookup, "PORTICO_QPS") { cfg.qps = v; }
        if let Some(v) = parsed::<u32, _>(&lookup, "PORTICO_BURST") { cfg.burst = v; }
        if let Some(v) = parsed::<usize, _>(&lookup, "PORTICO_NOTIFY_CAP") { cfg.notify_cap = v.max(1); }
        cfg
    }

    pub fn rate_limiter(&self) -> MaxOf<String> {
        MaxOf::new(vec![
            Box::new(ItemExponential::new(self.base_delay, self.max_delay)),
            Box::new(TokenBucket::new(self.qps, self.burst)),
        ])
    }

    /// Build the work queue described by this config. Needs a tokio runtime.
    pub fn build_queue(&self) -> WorkQueue<String> {
        WorkQueue::new(self.queue_name.clone(), self.rate_limiter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn lookup_overrides_defaults() {
        let env: HashMap<&str, &str> = [
            ("PORTICO_WORKERS", "8"),
            ("PORTICO_MAX_RETRIES", "3"),
            ("PORTICO_BASE_DELAY_MS", "50"),
            ("PORTICO_QPS", "2.5"),
        ]
        .into_iter()
        .collect();
        let cfg = ControllerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.workers, 8);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.base_delay, Duration::from_millis(50));
        assert_eq!(cfg.qps, 2.5);
        assert_eq!(cfg.burst, 100);
        assert_eq!(cfg.max_delay, Duration::from_secs(1000));
    }

    #[test]
    fn bad_values_fall_back_and_workers_stay_positive() {
        let cfg = ControllerConfig::from_lookup(|k| match k {
            "PORTICO_WORKERS" => Some("0".into()),
            "PORTICO_MAX_RETRIES" => Some("lots".into()),
            _ => None,
        });
        assert_eq!(cfg.workers, 1);
        assert_eq!(cfg.max_retries, DEFAULT_MAX_RETRIES);
    }
}
