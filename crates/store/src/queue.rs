//! Deduplicating work queue with per-item exponential backoff.
//!
//! An item is never handed to two workers at once: adds that arrive while the
//! item is being processed are parked and re-queued on `done`.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metrics::gauge;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::Notify;

/// Per-item exponential backoff: `base * 2^(failures-1)`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct ItemBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for ItemBackoff {
    fn default() -> Self {
        Self { base: Duration::from_millis(5), max: Duration::from_secs(1000) }
    }
}

impl ItemBackoff {
    pub fn delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(32);
        let factor = 1u64 << exp;
        let ms = (self.base.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(ms).min(self.max)
    }
}

struct State<K> {
    queue: VecDeque<K>,
    dirty: FxHashSet<K>,
    processing: FxHashSet<K>,
    failures: FxHashMap<K, u32>,
    shutting_down: bool,
}

struct Shared<K> {
    name: String,
    state: Mutex<State<K>>,
    notify: Notify,
    backoff: ItemBackoff,
}

pub struct WorkQueue<K> {
    inner: Arc<Shared<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new(name: impl Into<String>, backoff: ItemBackoff) -> Self {
        Self {
            inner: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: FxHashSet::default(),
                    processing: FxHashSet::default(),
                    failures: FxHashMap::default(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                backoff,
            }),
        }
    }

    pub fn name(&self) -> &str { &self.inner.name }

    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_depth(&self, depth: usize) {
        gauge!("vsync_queue_depth", depth as f64, "queue" => self.inner.name.clone());
    }

    /// Enqueue unless already pending; an item in flight is re-queued once it is done.
    pub fn add(&self, item: K) {
        let depth = {
            let mut st = self.lock();
            if st.shutting_down || !st.dirty.insert(item.clone()) {
                return;
            }
            if st.processing.contains(&item) {
                return;
            }
            st.queue.push_back(item);
            st.queue.len()
        };
        self.record_depth(depth);
        self.inner.notify.notify_one();
    }

    /// Enqueue after `delay`; a zero delay is a plain `add`.
    pub fn add_after(&self, item: K, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let q = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            q.add(item);
        });
    }

    /// Enqueue after the item's backoff delay and count a failure.
    pub fn add_rate_limited(&self, item: K) {
        let failures = {
            let mut st = self.lock();
            let n = st.failures.entry(item.clone()).or_insert(0);
            *n = n.saturating_add(1);
            *n
        };
        self.add_after(item, self.inner.backoff.delay(failures));
    }

    /// Reset the failure count of an item.
    pub fn forget(&self, item: &K) {
        self.lock().failures.remove(item);
    }

    pub fn num_requeues(&self, item: &K) -> u32 {
        self.lock().failures.get(item).copied().unwrap_or(0)
    }

    /// Wait for the next item. `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut st = self.lock();
                if let Some(item) = st.queue.pop_front() {
                    st.dirty.remove(&item);
                    st.processing.insert(item.clone());
                    let depth = st.queue.len();
                    drop(st);
                    self.record_depth(depth);
                    if depth > 0 {
                        self.inner.notify.notify_one();
                    }
                    return Some(item);
                }
                if st.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark an item as processed; re-queue it if it was added meanwhile.
    pub fn done(&self, item: &K) {
        let requeued = {
            let mut st = self.lock();
            st.processing.remove(item);
            if st.dirty.contains(item) && !st.shutting_down {
                st.queue.push_back(item.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.inner.notify.notify_one();
        }
    }

    pub fn len(&self) -> usize { self.lock().queue.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Stop accepting items and wake every waiting worker.
    pub fn shut_down(&self) {
        {
            let mut st = self.lock();
            st.shutting_down = true;
            st.queue.clear();
            st.dirty.clear();
        }
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool { self.lock().shutting_down }
}
