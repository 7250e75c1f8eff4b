use std::collections::VecDeque;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::delay::{self, Delayed};
use crate::limiter::RateLimiter;

struct State<K> {
    /// Handout order. Every entry is also in `pending`.
    queue: VecDeque<K>,
    /// Keys waiting to be handed out, queued or parked behind `processing`.
    pending: FxHashSet<K>,
    /// Keys handed out by `get` and not yet `done`.
    processing: FxHashSet<K>,
    shutting_down: bool,
}

enum Take<K> {
    Item(K),
    Empty,
    Shutdown,
}

pub(crate) struct Shared<K> {
    name: String,
    state: Mutex<State<K>>,
    notify: Notify,
    limiter: Mutex<Box<dyn RateLimiter<K>>>,
    delay_tx: mpsc::UnboundedSender<Delayed<K>>,
    stop: CancellationToken,
}

impl<K> Shared<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub(crate) fn add(&self, key: K) {
        let mut st = self.state.lock();
        if st.shutting_down || st.pending.contains(&key) {
            return;
        }
        counter!("portico_workqueue_adds_total", 1, "queue" => self.name.clone());
        st.pending.insert(key.clone());
        if st.processing.contains(&key) {
            // redelivered by `done`
            return;
        }
        st.queue.push_back(key);
        gauge!("portico_workqueue_depth", st.queue.len() as f64, "queue" => self.name.clone());
        drop(st);
        self.notify.notify_waiters();
    }

    fn take(&self) -> Take<K> {
        let mut st = self.state.lock();
        if st.shutting_down {
            return Take::Shutdown;
        }
        match st.queue.pop_front() {
            Some(key) => {
                st.pending.remove(&key);
                st.processing.insert(key.clone());
                gauge!("portico_workqueue_depth", st.queue.len() as f64, "queue" => self.name.clone());
                Take::Item(key)
            }
            None => Take::Empty,
        }
    }
}

/// Deduplicating, rate-limited queue handle. Clones share the same queue.
pub struct WorkQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self { Self { shared: Arc::clone(&self.shared) } }
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Create a queue and spawn its delay loop. Must be called inside a tokio runtime.
    pub fn new(name: impl Into<String>, limiter: impl RateLimiter<K> + 'static) -> Self {
        let (delay_tx, delay_rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        let shared = Arc::new(Shared {
            name: name.into(),
            state: Mutex::new(State {
                queue: VecDeque::new(),
                pending: FxHashSet::default(),
                processing: FxHashSet::default(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            limiter: Mutex::new(Box::new(limiter)),
            delay_tx,
            stop: stop.clone(),
        });
        tokio::spawn(delay::run(Arc::downgrade(&shared), delay_rx, stop));
        Self { shared }
    }

    pub fn name(&self) -> &str { &self.shared.name }

    /// Enqueue `key` unless it is already pending. A key that is being
    /// processed is parked and handed out again after its `done`.
    pub fn add(&self, key: K) { self.shared.add(key) }

    /// Wait for the next key. `None` once the queue is shutting down.
    /// Every `Some` must be paired with exactly one [`WorkQueue::done`].
    pub async fn get(&self) -> Option<K> {
        loop {
            // Registered before checking state so an add in between is not missed.
            let notified = self.shared.notify.notified();
            match self.shared.take() {
                Take::Item(key) => return Some(key),
                Take::Shutdown => return None,
                Take::Empty => notified.await,
            }
        }
    }

    /// Like [`WorkQueue::get`], but `done` runs when the lease drops.
    pub async fn lease(&self) -> Option<Lease<K>> {
        let key = self.get().await?;
        Some(Lease { queue: self.clone(), key: Some(key) })
    }

    /// Release the in-flight marker for `key`, redelivering it if it was re-added meanwhile.
    pub fn done(&self, key: &K) {
        let mut st = self.shared.state.lock();
        st.processing.remove(key);
        if st.pending.contains(key) {
            st.queue.push_back(key.clone());
            drop(st);
            self.shared.notify.notify_waiters();
        }
    }

    /// Enqueue `key` once `delay` has elapsed.
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        trace!(queue = %self.shared.name, ?delay, "delayed add");
        let _ = self.shared.delay_tx.send(Delayed { key, ready_at: Instant::now() + delay });
    }

    /// Enqueue `key` after the limiter's backoff for it.
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.shared.limiter.lock().when(&key);
        counter!("portico_workqueue_retries_total", 1, "queue" => self.shared.name.clone());
        self.add_after(key, delay);
    }

    /// Reset the failure count for `key`.
    pub fn forget(&self, key: &K) { self.shared.limiter.lock().forget(key) }

    pub fn num_requeues(&self, key: &K) -> u32 { self.shared.limiter.lock().num_requeues(key) }

    /// Keys currently waiting to be handed out (not counting parked or delayed keys).
    pub fn len(&self) -> usize { self.shared.state.lock().queue.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Wake every waiting `get` with `None`; later adds are ignored.
    pub fn shut_down(&self) {
        let mut st = self.shared.state.lock();
        if st.shutting_down {
            return;
        }
        st.shutting_down = true;
        debug!(queue = %self.shared.name, pending = st.pending.len(), processing = st.processing.len(), "queue shutting down");
        drop(st);
        self.shared.stop.cancel();
        self.shared.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool { self.shared.state.lock().shutting_down }
}

/// A key handed out by [`WorkQueue::lease`]; marks it done on drop, unwinding included.
pub struct Lease<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    queue: WorkQueue<K>,
    key: Option<K>,
}

impl<K> Lease<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn key(&self) -> &K {
        // only emptied in drop
        self.key.as_ref().unwrap_or_else(|| unreachable!("lease key taken before drop"))
    }
}

impl<K> Deref for Lease<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    type Target = K;
    fn deref(&self) -> &K { self.key() }
}

impl<K> Drop for Lease<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.queue.done(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::ItemExponential;

    fn queue() -> WorkQueue<String> {
        WorkQueue::new("test", ItemExponential::new(Duration::from_millis(5), Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn hands_out_in_fifo_order() {
        let q = queue();
        q.add("a".into());
        q.add("b".into());
        assert_eq!(q.get().await.as_deref(), Some("a"));
        assert_eq!(q.get().await.as_deref(), Some("b"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn coalesces_pending_duplicates() {
        let q = queue();
        for _ in 0..5 {
            q.add("a".into());
        }
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn parks_adds_while_processing_and_redelivers_once() {
        let q = queue();
        q.add("a".into());
        let k = q.get().await.expect("item");
        for _ in 0..10 {
            q.add("a".into());
        }
        assert_eq!(q.len(), 0, "must not hand out a key that is in flight");
        q.done(&k);
        assert_eq!(q.len(), 1);
        let again = q.get().await.expect("redelivered");
        q.done(&again);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn done_without_readd_drops_key() {
        let q = queue();
        q.add("a".into());
        let k = q.get().await.expect("item");
        q.done(&k);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn lease_drop_marks_done() {
        let q = queue();
        q.add("a".into());
        let lease = q.lease().await.expect("lease");
        assert_eq!(lease.as_str(), "a");
        q.add("a".into());
        assert_eq!(q.len(), 0);
        drop(lease);
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_wakes_blocked_getters() {
        let q = queue();
        let waiter = tokio::spawn({
            let q = q.clone();
            async move { q.get().await }
        });
        tokio::task::yield_now().await;
        q.shut_down();
        let got = tokio::time::timeout(Duration::from_secs(1), waiter).await.expect("woken").expect("join");
        assert!(got.is_none());
        q.add("late".into());
        assert!(q.get().await.is_none());
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn shutdown_stops_handing_out_queued_items() {
        let q = queue();
        q.add("a".into());
        q.shut_down();
        assert!(q.get().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn add_after_delivers_when_due() {
        let q = queue();
        let start = Instant::now();
        q.add_after("a".into(), Duration::from_secs(2));
        assert!(q.is_empty());
        let got = tokio::time::timeout(Duration::from_secs(10), q.get()).await.expect("delivered");
        assert_eq!(got.as_deref(), Some("a"));
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_key_keeps_earliest_deadline() {
        let q = queue();
        let start = Instant::now();
        q.add_after("a".into(), Duration::from_secs(30));
        q.add_after("a".into(), Duration::from_secs(1));
        q.add_after("a".into(), Duration::from_secs(20));
        let got = q.get().await.expect("item");
        assert!(start.elapsed() < Duration::from_secs(20));
        q.done(&got);
        // only one timer existed for the key
        let second = tokio::time::timeout(Duration::from_secs(60), q.get()).await;
        assert!(second.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_adds_count_requeues_until_forgotten() {
        let q = queue();
        let k = "a".to_string();
        q.add_rate_limited(k.clone());
        q.add_rate_limited(k.clone());
        assert_eq!(q.num_requeues(&k), 2);
        let got = q.get().await.expect("item");
        q.done(&got);
        q.forget(&k);
        assert_eq!(q.num_requeues(&k), 0);
    }
}
