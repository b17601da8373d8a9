//! FIFO queue shared between the main thread and a worker

use parking_lot::Mutex;
use std::collections::VecDeque;

/// A mutex-guarded FIFO queue.
///
/// Each queue has one producer and one consumer; order is preserved within a
/// queue, never across queues.
#[derive(Debug)]
pub struct SharedQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> SharedQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Append an item
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
    }

    /// Remove the oldest item
    pub fn pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T> Default for SharedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
