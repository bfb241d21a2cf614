//! Delayed, deduplicating work queue
//!
//! Items are keys only. A key is pending at most once; a key handed to a
//! worker is not handed to another worker until [`WorkQueue::done`] is called
//! for it. Re-adding a key while it is processing parks it until then.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

struct QueueState<K> {
    /// Ready keys in FIFO order
    ready: VecDeque<K>,
    /// Keys waiting to be processed (ready or parked behind processing)
    dirty: HashSet<K>,
    /// Keys currently held by a worker
    processing: HashSet<K>,
    /// Delayed keys ordered by due time; entries superseded in `due` are stale
    waiting: BinaryHeap<Reverse<(Instant, u64, K)>>,
    /// Earliest due time per delayed key
    due: HashMap<K, Instant>,
    next_entry: u64,
    shutting_down: bool,
}

impl<K: Clone + Eq + Hash + Ord> QueueState<K> {
    fn mark_dirty(&mut self, key: K) -> bool {
        if !self.dirty.insert(key.clone()) {
            return false;
        }
        if self.processing.contains(&key) {
            return false;
        }
        self.ready.push_back(key);
        true
    }

    /// Move due delayed keys to the ready queue; returns the next due time.
    fn promote_due(&mut self, now: Instant) -> Option<Instant> {
        while let Some(Reverse((at, _, key))) = self.waiting.peek().cloned() {
            if self.due.get(&key) != Some(&at) {
                self.waiting.pop();
                continue;
            }
            if at > now {
                return Some(at);
            }
            self.waiting.pop();
            self.due.remove(&key);
            self.mark_dirty(key);
        }
        None
    }
}

/// Work queue shared by the discovery task and the workers of one loop
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K: Clone + Eq + Hash + Ord + Send> Default for WorkQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Eq + Hash + Ord + Send> WorkQueue<K> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                ready: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                waiting: BinaryHeap::new(),
                due: HashMap::new(),
                next_entry: 0,
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue a key for immediate processing. Duplicates collapse.
    pub async fn add(&self, key: K) {
        let mut state = self.state.lock().await;
        if state.shutting_down {
            return;
        }
        // An immediate run supersedes a pending delayed one
        state.due.remove(&key);
        if state.mark_dirty(key) {
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Enqueue a key once `delay` has elapsed. If the key is already pending
    /// sooner, this is a no-op.
    pub async fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            return self.add(key).await;
        }

        let mut state = self.state.lock().await;
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        let at = Instant::now() + delay;
        if state.due.get(&key).is_some_and(|existing| *existing <= at) {
            return;
        }
        state.due.insert(key.clone(), at);
        let entry = state.next_entry;
        state.next_entry += 1;
        state.waiting.push(Reverse((at, entry, key)));
        drop(state);

        // Wake a sleeping worker so it recomputes its deadline
        self.notify.notify_one();
    }

    /// Wait for the next ready key. Returns `None` once the queue is shut
    /// down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_due = {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                let next_due = state.promote_due(Instant::now());
                if let Some(key) = state.ready.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.ready.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                next_due
            };

            match next_due {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Release a key handed out by [`get`](Self::get). A key re-added while
    /// it was processing becomes ready now.
    pub async fn done(&self, key: &K) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.ready.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys; every blocked and future `get` returns `None`.
    pub async fn shut_down(&self) {
        self.state.lock().await.shutting_down = true;
        self.notify.notify_waiters();
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.state.lock().await.shutting_down
    }

    /// Number of keys ready or parked for processing
    pub async fn len(&self) -> usize {
        self.state.lock().await.dirty.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of keys scheduled for later
    pub async fn delayed_len(&self) -> usize {
        self.state.lock().await.due.len()
    }
}
