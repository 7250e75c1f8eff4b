//! Delayed inserts: a timer wheel that feeds keys back into the queue when due.

use std::hash::Hash;
use std::sync::Weak;

use futures::StreamExt;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::debug;

use crate::queue::Shared;

pub(crate) struct Delayed<K> {
    pub key: K,
    pub ready_at: Instant,
}

/// Owns the timers for one queue. A key waits at most once; a second
/// request for an already waiting key only ever moves its deadline earlier.
/// Exits on shutdown, or once the queue itself is gone.
pub(crate) async fn run<K>(shared: Weak<Shared<K>>, mut rx: mpsc::UnboundedReceiver<Delayed<K>>, stop: CancellationToken)
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    let mut timers: DelayQueue<K> = DelayQueue::new();
    let mut waiting: FxHashMap<K, (delay_queue::Key, Instant)> = FxHashMap::default();
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            msg = rx.recv() => {
                let Some(Delayed { key, ready_at }) = msg else { break };
                match waiting.get_mut(&key) {
                    Some((_, at)) if *at <= ready_at => {}
                    Some((timer, at)) => {
                        timers.reset_at(timer, ready_at);
                        *at = ready_at;
                    }
                    None => {
                        let timer = timers.insert_at(key.clone(), ready_at);
                        waiting.insert(key, (timer, ready_at));
                    }
                }
            }
            Some(expired) = timers.next() => {
                let key = expired.into_inner();
                waiting.remove(&key);
                match shared.upgrade() {
                    Some(queue) => queue.add(key),
                    None => break,
                }
            }
        }
    }
    debug!(waiting = waiting.len(), "delay loop stopped");
}
