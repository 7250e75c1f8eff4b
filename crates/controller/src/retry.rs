use metrics::counter;
use portico_queue::WorkQueue;
use tracing::{error, warn};

use crate::reconcile::{Outcome, ReconcileError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Succeeded; failure history cleared.
    Done,
    /// Failed and scheduled again after backoff.
    Requeued,
    /// Abandoned until a fresh notification re-adds the key.
    Dropped,
}

/// Bounded retries: requeue with backoff while `num_requeues <= max_retries`, then give up.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self { Self { max_retries } }

    pub fn max_retries(&self) -> u32 { self.max_retries }

    pub fn handle(&self, queue: &WorkQueue<String>, key: &String, result: &Result<Outcome, ReconcileError>) -> Verdict {
        let err = match result {
            Ok(_) => {
                queue.forget(key);
                return Verdict::Done;
            }
            Err(e) => e,
        };

        if !err.is_retryable() {
            error!(key = %key, error = %err, "dropping unprocessable key");
            counter!("portico_reconcile_dropped_total", 1, "reason" => "invalid_key");
            queue.forget(key);
            return Verdict::Dropped;
        }

        let requeues = queue.num_requeues(key);
        if requeues <= self.max_retries {
            warn!(key = %key, error = %err, attempt = requeues + 1, "reconcile failed; requeueing");
            queue.add_rate_limited(key.clone());
            return Verdict::Requeued;
        }

        error!(key = %key, error = %err, retries = requeues, "giving up on key after repeated failures");
        counter!("portico_reconcile_dropped_total", 1, "reason" => "retries_exhausted");
        queue.forget(key);
        Verdict::Dropped
    }
}

impl Default for RetryPolicy {
    fn default() -> Self { Self::new(crate::config::DEFAULT_MAX_RETRIES) }
}
