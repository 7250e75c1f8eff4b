use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use metrics::counter;
use portico_queue::WorkQueue;
use tracing::{debug, error};

use crate::reconcile::{Outcome, ReconcileError, Reconciler};
use crate::retry::RetryPolicy;

/// Pull keys until the queue shuts down. Holds the lease for the whole
/// reconcile so the key cannot be handed to another worker meanwhile.
pub(crate) async fn run(id: usize, queue: WorkQueue<String>, reconciler: Arc<Reconciler>, retry: RetryPolicy) {
    debug!(worker = id, "worker started");
    while let Some(lease) = queue.lease().await {
        let raw = lease.key();
        let result = AssertUnwindSafe(reconciler.reconcile(raw))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ReconcileError::Panicked { raw: raw.clone(), message: panic_message(&*panic) }));
        record(id, raw, &result);
        retry.handle(&queue, raw, &result);
    }
    debug!(worker = id, "worker stopped");
}

fn record(id: usize, raw: &str, result: &Result<Outcome, ReconcileError>) {
    match result {
        Ok(outcome) => {
            debug!(worker = id, key = %raw, outcome = %outcome, "reconciled");
            counter!("portico_reconcile_total", 1, "outcome" => outcome.as_str());
        }
        Err(ReconcileError::Panicked { message, .. }) => {
            error!(worker = id, key = %raw, panic = %message, "reconcile panicked");
            counter!("portico_reconcile_total", 1, "outcome" => "panic");
        }
        Err(_) => {
            counter!("portico_reconcile_total", 1, "outcome" => "error");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
