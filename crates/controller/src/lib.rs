//! Portico controller: keeps one Ingress per annotated Service.
//!
//! Watchers send [`Notification`]s; the dispatcher turns them into keys on a
//! [`WorkQueue`]; a fixed pool of workers reconciles each key against the
//! local cache and the remote store, and the [`RetryPolicy`] decides what
//! happens to failures. Only current state matters, so a reconcile that
//! missed intermediate changes still converges.

#![forbid(unsafe_code)]

pub mod config;
pub mod dispatch;
pub mod reconcile;
pub mod retry;
mod worker;

use std::sync::Arc;

use portico_core::{Cache, DerivedStore};
use portico_queue::WorkQueue;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use config::ControllerConfig;
pub use portico_core::Notification;
pub use reconcile::{Outcome, ReconcileError, Reconciler};
pub use retry::{RetryPolicy, Verdict};

pub struct Controller {
    queue: WorkQueue<String>,
    reconciler: Arc<Reconciler>,
    retry: RetryPolicy,
    workers: usize,
}

impl Controller {
    pub fn new(config: &ControllerConfig, queue: WorkQueue<String>, cache: Arc<dyn Cache>, store: Arc<dyn DerivedStore>) -> Self {
        Self {
            queue,
            reconciler: Arc::new(Reconciler::new(cache, store)),
            retry: RetryPolicy::new(config.max_retries),
            workers: config.workers.max(1),
        }
    }

    pub fn queue(&self) -> &WorkQueue<String> { &self.queue }

    /// Dispatch `notifications` and run the worker pool until `stop` fires.
    ///
    /// On stop the queue shuts down: idle workers return at once, busy ones
    /// finish their current key (store calls are not aborted) and then exit.
    pub async fn run(self, notifications: mpsc::Receiver<Notification>, stop: CancellationToken) {
        info!(workers = self.workers, queue = %self.queue.name(), "controller starting");
        let dispatcher = tokio::spawn(dispatch::run(self.queue.clone(), notifications, stop.clone()));
        let mut workers = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            workers.push(tokio::spawn(worker::run(id, self.queue.clone(), Arc::clone(&self.reconciler), self.retry)));
        }

        stop.cancelled().await;
        info!("stop requested; draining workers");
        self.queue.shut_down();

        if let Err(e) = dispatcher.await {
            warn!(error = %e, "dispatcher task failed");
        }
        for (id, handle) in workers.into_iter().enumerate() {
            if let Err(e) = handle.await {
                warn!(worker = id, error = %e, "worker task failed");
            }
        }
        info!("controller stopped");
    }
}
