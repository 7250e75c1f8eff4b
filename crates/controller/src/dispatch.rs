//! Turns watch notifications into queue keys.
//!
//! Watchers push [`Notification`]s into a channel; the dispatcher is the only
//! consumer and the only place that decides whether a change is worth a
//! reconcile. Updates are compared on the trigger annotation alone, and
//! Ingress deletions only count when a Service is the managing owner.

use metrics::counter;
use portico_core::{Notification, ResourceKey, SourceResource};
use portico_queue::WorkQueue;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Whether an update flips what the reconciler would decide for the Service.
pub fn trigger_changed(old: &SourceResource, new: &SourceResource) -> bool {
    old.wants_derived() != new.wants_derived()
}

/// Key to enqueue for `n`, or `None` when the notification is irrelevant.
pub fn route(n: &Notification) -> Option<ResourceKey> {
    match n {
        Notification::SourceAdded(svc) => Some(svc.key()),
        Notification::SourceUpdated { old, new } => trigger_changed(old, new).then(|| new.key()),
        Notification::DerivedDeleted(ing) => ing.owned_by_source_kind().then(|| ing.key()),
    }
}

/// Route one notification into `queue`. Returns whether a key was added.
pub fn dispatch(queue: &WorkQueue<String>, n: &Notification) -> bool {
    match route(n) {
        Some(key) => {
            trace!(%key, "enqueue");
            queue.add(key.encode());
            true
        }
        None => {
            counter!("portico_notifications_suppressed_total", 1);
            false
        }
    }
}

/// Drain `rx` into `queue` until the channel closes or `stop` fires.
pub async fn run(queue: WorkQueue<String>, mut rx: mpsc::Receiver<Notification>, stop: CancellationToken) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(n) => { dispatch(&queue, &n); }
                None => break,
            },
        }
    }
    debug!("dispatcher stopped");
}
