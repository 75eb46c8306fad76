use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::Mutex;
use std::{collections::VecDeque, fmt, hash::Hash, sync::Arc, time::Duration};
use tokio::sync::Notify;

const BASE_DELAY: Duration = Duration::from_millis(5);
const MAX_DELAY: Duration = Duration::from_secs(1000);

/// A de-duplicated work queue with per-key retry backoff.
///
/// Keys present in the queue or currently being processed are coalesced: a key
/// is redelivered after its in-flight attempt finishes rather than run
/// concurrently, so reconciliation for one identity is strictly serialized.
pub struct WorkQueue<K> {
    state: Mutex<State<K>>,
    notify: Notify,
}

struct State<K> {
    queue: VecDeque<K>,
    /// Keys waiting to be (re)delivered.
    dirty: HashSet<K>,
    /// Keys currently held by a worker between `get` and `done`.
    processing: HashSet<K>,
    retries: HashMap<K, u32>,
    shut_down: bool,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                retries: HashMap::new(),
                shut_down: false,
            }),
            notify: Notify::new(),
        })
    }

    /// Enqueues a key. A no-op if the key is already pending; a key being
    /// processed is marked dirty and redelivered once `done` is called.
    pub fn add(&self, key: K) {
        {
            let mut state = self.state.lock();
            if state.shut_down || state.dirty.contains(&key) {
                return;
            }
            state.dirty.insert(key.clone());
            if state.processing.contains(&key) {
                return;
            }
            state.queue.push_back(key);
        }
        self.notify.notify_one();
    }

    /// Blocks until a key is available; returns `None` once the queue is shut
    /// down and drained.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    if !state.queue.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shut_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Releases a key obtained from `get`. Must be called exactly once per
    /// delivery; redelivers the key if it was re-added while in flight.
    pub fn done(&self, key: &K) {
        let redeliver = {
            let mut state = self.state.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) && !state.shut_down {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if redeliver {
            self.notify.notify_one();
        }
    }

    /// Re-enqueues a key after an exponentially growing delay, bumping its
    /// retry count.
    pub fn add_rate_limited(self: &Arc<Self>, key: K) {
        let delay = {
            let mut state = self.state.lock();
            if state.shut_down {
                return;
            }
            let requeues = state.retries.entry(key.clone()).or_insert(0);
            *requeues += 1;
            backoff(*requeues)
        };
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.state.lock().retries.get(key).copied().unwrap_or(0)
    }

    /// Clears a key's retry counter.
    pub fn forget(&self, key: &K) {
        self.state.lock().retries.remove(key);
    }

    /// Stops admission of new keys and unblocks all waiters. In-flight keys
    /// finish; queued keys are still drained by `get`.
    pub fn shut_down(&self) {
        self.state.lock().shut_down = true;
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> fmt::Debug for WorkQueue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WorkQueue")
            .field("len", &state.queue.len())
            .field("processing", &state.processing.len())
            .field("shut_down", &state.shut_down)
            .finish()
    }
}

fn backoff(requeues: u32) -> Duration {
    let exp = requeues.saturating_sub(1).min(28);
    BASE_DELAY
        .saturating_mul(1u32 << exp)
        .min(MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn deduplicates_pending_keys() {
        let queue = WorkQueue::new();
        queue.add("a");
        queue.add("a");
        queue.add("a");
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.get().await, Some("a"));
        assert!(queue.is_empty());
        queue.done(&"a");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn redelivers_key_added_while_in_flight() {
        let queue = WorkQueue::new();
        queue.add("a");
        let key = queue.get().await.unwrap();

        // A second add while "a" is processing must not deliver concurrently.
        queue.add("a");
        assert!(queue.is_empty());

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some("a"));
        queue.done(&"a");
    }

    #[tokio::test]
    async fn tracks_and_forgets_requeues() {
        let queue = WorkQueue::new();
        assert_eq!(queue.num_requeues(&"a"), 0);
        queue.add_rate_limited("a");
        queue.add_rate_limited("a");
        assert_eq!(queue.num_requeues(&"a"), 2);
        queue.forget(&"a");
        assert_eq!(queue.num_requeues(&"a"), 0);
    }

    #[tokio::test]
    async fn rate_limited_add_is_delayed() {
        let queue = WorkQueue::new();
        queue.add_rate_limited("a");
        let key = tokio::time::timeout(Duration::from_secs(1), queue.get())
            .await
            .expect("key must be redelivered");
        assert_eq!(key, Some("a"));
    }

    #[tokio::test]
    async fn shutdown_unblocks_waiters_and_drains() {
        let queue = WorkQueue::new();
        queue.add("a");
        queue.shut_down();

        // Queued keys are still delivered, then the queue terminates.
        assert_eq!(queue.get().await, Some("a"));
        queue.done(&"a");
        assert_eq!(queue.get().await, None);

        // New keys are refused after shutdown.
        queue.add("b");
        assert_eq!(queue.get().await, None);
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        assert_eq!(backoff(1), Duration::from_millis(5));
        assert_eq!(backoff(2), Duration::from_millis(10));
        assert_eq!(backoff(5), Duration::from_millis(80));
        assert_eq!(backoff(64), MAX_DELAY);
    }
}
