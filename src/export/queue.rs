//! Bounded command queue between the recorder and the exporter thread
//!
//! Producers must never block on the sink, so the queue absorbs exporter
//! back-pressure: on overflow the oldest queued item is dropped and the
//! caller is told, so it can count the loss. A ring buffer under a single
//! lock is plenty here - the queue only ever has one consumer.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// Outcome of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Item queued, nothing lost
    Accepted,
    /// Item queued, but the oldest queued item was dropped to make room
    DroppedOldest,
    /// Queue is closed; item discarded
    Closed,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Fixed-capacity FIFO that drops the oldest item on overflow
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be nonzero");
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Non-blocking push; drops the oldest item when full
    pub fn push(&self, item: T) -> PushOutcome {
        let mut inner = self.inner.lock();
        if inner.closed {
            return PushOutcome::Closed;
        }
        let outcome = if inner.items.len() >= self.capacity {
            inner.items.pop_front();
            PushOutcome::DroppedOldest
        } else {
            PushOutcome::Accepted
        };
        inner.items.push_back(item);
        drop(inner);
        self.available.notify_one();
        outcome
    }

    /// Wait up to `timeout` for an item
    ///
    /// `None` means the timeout elapsed, or the queue is closed and drained.
    pub fn pop_wait(&self, timeout: Duration) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            if self.available.wait_for(&mut inner, timeout).timed_out() {
                return inner.items.pop_front();
            }
        }
    }

    /// Close the queue; queued items remain poppable, new pushes are discarded
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
