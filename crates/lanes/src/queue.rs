//! Bounded-lifetime FIFO job queue
//!
//! A mutex-and-condvar blocking queue with a terminal "completed" state.
//! Once adding is completed, producers are rejected and consumers drain the
//! remaining items before seeing end-of-stream. Take order is strict FIFO.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Error returned when adding to a completed queue. Hands the item back so
/// the caller can unwind bookkeeping for it.
#[derive(Debug)]
pub(crate) struct AddError<T>(pub T);

struct Inner<T> {
    items: VecDeque<T>,
    completed: bool,
}

/// Multi-producer, multi-consumer FIFO queue with blocking take and an
/// idempotent terminal state.
pub(crate) struct BlockingQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                completed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append an item. Fails once `complete_adding` has been called.
    pub fn add(&self, item: T) -> Result<(), AddError<T>> {
        let mut inner = self.inner.lock();
        if inner.completed {
            return Err(AddError(item));
        }
        inner.items.push_back(item);
        drop(inner);
        self.available.notify_one();
        Ok(())
    }

    /// Block until an item is available or the queue is drained and
    /// completed. Returns `None` only at end-of-stream.
    pub fn take(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.completed {
                return None;
            }
            self.available.wait(&mut inner);
        }
    }

    /// Non-blocking take. `None` means empty right now, not end-of-stream.
    pub fn try_take(&self) -> Option<T> {
        self.inner.lock().items.pop_front()
    }

    /// Seal the queue. Consumers drain the remainder, then unblock with
    /// `None`. Idempotent.
    pub fn complete_adding(&self) {
        let mut inner = self.inner.lock();
        if inner.completed {
            return;
        }
        inner.completed = true;
        drop(inner);
        self.available.notify_all();
    }

    pub fn is_completed(&self) -> bool {
        self.inner.lock().completed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Non-consuming copy of the queued items, front first.
    #[allow(dead_code)]
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.inner.lock().items.iter().cloned().collect()
    }
}
