//! FIFO set of recently touched keys.
//!
//! Each queued key pins a strong handle to its value so the value survives
//! reclamation while queued. Position is decided by the first touch only;
//! touching a queued key again does not move it.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

#[derive(Debug)]
pub struct RetentionQueue<V> {
    bound: Option<usize>,
    inner: Mutex<QueueState<V>>,
}

#[derive(Debug)]
struct QueueState<V> {
    order: VecDeque<String>,
    pinned: HashMap<String, V>,
}

impl<V> RetentionQueue<V> {
    /// A negative `hard_size` means unbounded.
    pub fn new(hard_size: i64) -> Self {
        let bound = usize::try_from(hard_size).ok();
        Self {
            bound,
            inner: Mutex::new(QueueState {
                order: VecDeque::new(),
                pinned: HashMap::new(),
            }),
        }
    }

    pub fn bound(&self) -> Option<usize> {
        self.bound
    }

    /// Enqueues `key` if absent and returns the key that lost its protection,
    /// if the bound was exceeded.
    pub fn touch(&self, key: &str, value: V) -> Option<String> {
        let mut state = self.inner.lock();
        if state.pinned.contains_key(key) {
            return None;
        }
        state.pinned.insert(key.to_string(), value);
        state.order.push_back(key.to_string());

        match self.bound {
            Some(bound) if state.order.len() > bound => {
                let oldest = state.order.pop_front()?;
                state.pinned.remove(&oldest);
                Some(oldest)
            }
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().pinned.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut state = self.inner.lock();
        if state.pinned.remove(key).is_none() {
            return false;
        }
        state.order.retain(|k| k != key);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Oldest first.
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().order.iter().cloned().collect()
    }

    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.order.clear();
        state.pinned.clear();
    }
}
