//! Ordered Event Dispatch
//!
//! Network receipt happens on I/O tasks; simulation and client frame updates
//! happen on one consuming context. The queue carries events across that
//! boundary while preserving arrival order, so inbound handlers never race
//! the consumer's own use of shared state.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// A thread-safe FIFO buffer drained once per cycle of a single consumer.
///
/// Producers may push from any thread. [`DispatchQueue::drain_all`] returns
/// every entry enqueued so far in arrival order; entries pushed during a
/// drain are picked up by the next one. The critical section covers only the
/// queue handoff, never the processing of entries.
#[derive(Debug)]
pub struct DispatchQueue<T> {
    entries: Mutex<VecDeque<T>>,
}

impl<T> DispatchQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Enqueue an entry. Callable from any producing context.
    pub fn push(&self, entry: T) {
        self.lock().push_back(entry);
    }

    /// Take every entry enqueued so far, in FIFO order.
    pub fn drain_all(&self) -> Vec<T> {
        let mut entries = self.lock();
        entries.drain(..).collect()
    }

    /// Number of entries currently queued.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        // A poisoned queue still holds a valid FIFO; keep draining it.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for DispatchQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
