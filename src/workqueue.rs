//! De-duplicating, rate-limited work queue (spec §4.3).
//!
//! One instance per object kind per controller. Adding a key that is
//! already queued (or currently being processed) is a no-op beyond
//! marking it dirty for redelivery; `get` hands out keys in FIFO order
//! and keyed exclusivity between `get`/`done` guarantees the same key is
//! never processed by two workers at once, without any lock the workers
//! themselves need to take.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::rate_limiter::RetryPolicy;

struct Inner<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    attempts: HashMap<K, u32>,
}

impl<K: Eq + Hash> Default for Inner<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            attempts: HashMap::new(),
        }
    }
}

/// A de-duplicating, rate-limited FIFO queue keyed by object identity.
pub struct WorkQueue<K> {
    inner: Mutex<Inner<K>>,
    notify: Notify,
    policy: RetryPolicy,
    shutting_down: AtomicBool,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    pub fn new(policy: RetryPolicy) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            policy,
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Enqueue a key immediately. No-op if the key is already queued or
    /// is currently being processed (it is marked dirty and will be
    /// redelivered when `done` is called).
    pub async fn add(self: &Arc<Self>, key: K) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let mut inner = self.inner.lock().await;
        if inner.dirty.contains(&key) {
            return;
        }
        inner.dirty.insert(key.clone());
        if inner.processing.contains(&key) {
            // Will be re-queued in `done` once the in-flight tick finishes.
            return;
        }
        inner.queue.push_back(key);
        drop(inner);
        self.notify.notify_one();
    }

    /// Enqueue after a delay, without growing the backoff counter. Used
    /// by resync and explicit caller-chosen requeue delays.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            this.add(key).await;
        });
    }

    /// Enqueue after the per-key exponential backoff window, growing the
    /// attempt counter for this key.
    pub async fn add_rate_limited(self: &Arc<Self>, key: K) {
        let attempt = {
            let mut inner = self.inner.lock().await;
            let counter = inner.attempts.entry(key.clone()).or_insert(0);
            let attempt = *counter;
            *counter += 1;
            attempt
        };
        let delay = self.policy.backoff_for(attempt);
        self.add_after(key, delay);
    }

    /// Reset the backoff counter for a key. Call on a successful
    /// reconcile so the next failure starts the backoff from scratch.
    pub async fn forget(self: &Arc<Self>, key: &K) {
        self.inner.lock().await.attempts.remove(key);
    }

    /// Pop the next key, blocking until one is available or the queue is
    /// shut down (in which case `None` is returned).
    pub async fn get(self: &Arc<Self>) -> Option<K> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(key) = inner.queue.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    return Some(key);
                }
                if self.shutting_down.load(Ordering::SeqCst) {
                    return None;
                }
            }
            self.notify.notified().await;
            if self.shutting_down.load(Ordering::SeqCst) {
                let mut inner = self.inner.lock().await;
                if let Some(key) = inner.queue.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    return Some(key);
                }
                return None;
            }
        }
    }

    /// Mark a key as finished processing. If it was re-added while in
    /// flight (dirty), it is immediately re-queued for another tick.
    pub async fn done(self: &Arc<Self>, key: &K) {
        let mut inner = self.inner.lock().await;
        inner.processing.remove(key);
        if inner.dirty.contains(key) {
            inner.queue.push_back(key.clone());
            drop(inner);
            self.notify.notify_one();
        }
    }

    pub async fn len(self: &Arc<Self>) -> usize {
        self.inner.lock().await.queue.len()
    }

    /// Stop semantics: no further adds are accepted; in-flight `get`
    /// calls drain whatever remains queued, then return `None` forever.
    pub fn shutdown(self: &Arc<Self>) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dedup_while_queued() {
        let q = WorkQueue::new(RetryPolicy::default());
        q.add("a").await;
        q.add("a").await;
        assert_eq!(q.len().await, 1);
    }

    #[tokio::test]
    async fn redelivers_when_dirtied_during_processing() {
        let q = WorkQueue::new(RetryPolicy::default());
        q.add("a").await;
        let got = q.get().await.unwrap();
        assert_eq!(got, "a");
        // Re-added while in flight: should not duplicate the queue, but
        // should redeliver after done().
        q.add("a").await;
        assert_eq!(q.len().await, 0);
        q.done(&"a").await;
        assert_eq!(q.len().await, 1);
    }

    #[tokio::test]
    async fn fifo_order() {
        let q = WorkQueue::new(RetryPolicy::default());
        q.add("a").await;
        q.add("b").await;
        q.add("c").await;
        assert_eq!(q.get().await, Some("a"));
        assert_eq!(q.get().await, Some("b"));
        assert_eq!(q.get().await, Some("c"));
    }

    #[tokio::test]
    async fn shutdown_drains_then_stops() {
        let q = WorkQueue::new(RetryPolicy::default());
        q.add("a").await;
        q.shutdown();
        assert_eq!(q.get().await, Some("a"));
        assert_eq!(q.get().await, None);
    }
}
