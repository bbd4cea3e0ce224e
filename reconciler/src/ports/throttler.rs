//! Throttler port and an in-memory priority-queue implementation.
//!
//! The throttler is the sole arbiter of how many tasks may run at once. A task
//! key is first added to its queues, then repeatedly asks for admission with
//! [`Throttler::pop_pending`] and finally releases its slot with
//! [`Throttler::pop_processing`].

use crate::core::QueueConfig;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Answer of an admission or release request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Whether the request took effect.
    pub admitted: bool,
    /// Human-readable detail.
    pub detail: String,
}

impl Admission {
    /// A positive answer.
    #[must_use]
    pub fn granted(detail: impl Into<String>) -> Self {
        Self {
            admitted: true,
            detail: detail.into(),
        }
    }

    /// A negative answer.
    #[must_use]
    pub fn denied(detail: impl Into<String>) -> Self {
        Self {
            admitted: false,
            detail: detail.into(),
        }
    }
}

/// Admission control.
#[cfg_attr(test, mockall::automock)]
pub trait Throttler: Send + Sync {
    /// Enqueues the key into every listed queue. Idempotent.
    fn add_key_to_queues(&self, key: &str, queues: &[QueueConfig]);

    /// Asks whether the key may start processing.
    fn pop_pending(&self, key: &str) -> Admission;

    /// Releases the key's processing slot.
    fn pop_processing(&self, key: &str) -> Admission;
}

#[derive(Debug)]
struct PendingEntry {
    key: String,
    priority: i64,
    seq: u64,
}

#[derive(Debug, Default)]
struct Queue {
    window: usize,
    pending: Vec<PendingEntry>,
    processing: HashSet<String>,
}

impl Queue {
    fn free_slots(&self) -> usize {
        self.window.saturating_sub(self.processing.len())
    }

    /// Position of the key among pending entries, highest priority first.
    fn rank(&self, key: &str) -> Option<usize> {
        let mut ordered: Vec<&PendingEntry> = self.pending.iter().collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        ordered.iter().position(|e| e.key == key)
    }
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, Queue>,
    memberships: HashMap<String, Vec<String>>,
    seq: u64,
}

/// Window/priority throttler kept in process memory.
///
/// A key is admitted when, in every queue it belongs to, it ranks within the
/// queue's free slots. Keys that belong to no queue are admitted immediately.
#[derive(Debug, Default)]
pub struct InMemoryThrottler {
    state: Mutex<State>,
}

impl InMemoryThrottler {
    /// Creates an empty throttler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently processing in a queue.
    #[must_use]
    pub fn processing_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.processing.len())
    }

    /// Number of keys waiting in a queue.
    #[must_use]
    pub fn pending_count(&self, queue: &str) -> usize {
        self.state.lock().queues.get(queue).map_or(0, |q| q.pending.len())
    }
}

impl Throttler for InMemoryThrottler {
    fn add_key_to_queues(&self, key: &str, queues: &[QueueConfig]) {
        let mut state = self.state.lock();
        for config in queues {
            state.seq += 1;
            let seq = state.seq;
            let queue = state.queues.entry(config.name.clone()).or_default();
            queue.window = config.window.max(1);
            let known = queue.processing.contains(key) || queue.pending.iter().any(|e| e.key == key);
            if !known {
                queue.pending.push(PendingEntry {
                    key: key.to_string(),
                    priority: config.priority,
                    seq,
                });
            }
            let memberships = state.memberships.entry(key.to_string()).or_default();
            if !memberships.contains(&config.name) {
                memberships.push(config.name.clone());
            }
        }
    }

    fn pop_pending(&self, key: &str) -> Admission {
        let mut state = self.state.lock();
        let Some(names) = state.memberships.get(key).cloned() else {
            return Admission::granted("no queue");
        };

        for name in &names {
            let Some(queue) = state.queues.get(name) else { continue };
            if queue.processing.contains(key) {
                continue;
            }
            match queue.rank(key) {
                Some(rank) if rank < queue.free_slots() => {}
                Some(rank) => {
                    return Admission::denied(format!(
                        "queue {name} is full ({}/{}), {rank} task(s) ahead",
                        queue.processing.len(),
                        queue.window
                    ));
                }
                None => return Admission::denied(format!("not enqueued in queue {name}")),
            }
        }

        for name in &names {
            if let Some(queue) = state.queues.get_mut(name) {
                queue.pending.retain(|e| e.key != key);
                queue.processing.insert(key.to_string());
            }
        }
        Admission::granted(format!("admitted by {} queue(s)", names.len()))
    }

    fn pop_processing(&self, key: &str) -> Admission {
        let mut state = self.state.lock();
        let Some(names) = state.memberships.remove(key) else {
            return Admission::denied("not enqueued");
        };
        let mut released = false;
        for name in &names {
            if let Some(queue) = state.queues.get_mut(name) {
                released |= queue.processing.remove(key);
                queue.pending.retain(|e| e.key != key);
            }
        }
        if released {
            Admission::granted("released")
        } else {
            Admission::denied("was not processing")
        }
    }
}
