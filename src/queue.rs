use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::types::Action;

/// Ordered, thread-safe sequence of pending actions.
///
/// Appends and removals each hold the inner mutex only for the push or pop itself, so producers
/// never wait on a flush in progress; serialising whole drains is the drain lock's job, not this
/// type's. Insertion order is the commit order within one flush.
#[derive(Debug)]
pub struct ActionQueue<T> {
    items: Mutex<VecDeque<Action<T>>>,
}

impl<T> Default for ActionQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ActionQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Append one action at the tail.
    pub fn enqueue(&self, action: Action<T>) {
        self.items.lock().push_back(action);
    }

    /// Append several actions at the tail, keeping their relative order contiguous.
    pub fn enqueue_all<I>(&self, actions: I)
    where
        I: IntoIterator<Item = Action<T>>,
    {
        let actions: Vec<_> = actions.into_iter().collect();
        if actions.is_empty() {
            return;
        }
        self.items.lock().extend(actions);
    }

    /// Remove and return the oldest action.
    pub fn dequeue(&self) -> Option<Action<T>> {
        self.items.lock().pop_front()
    }

    /// Put actions back at the head, ahead of anything enqueued since they were taken.
    ///
    /// `actions` must be in their original dequeue order.
    pub(crate) fn requeue_front(&self, actions: Vec<Action<T>>) {
        let mut items = self.items.lock();
        for action in actions.into_iter().rev() {
            items.push_front(action);
        }
    }

    /// Advisory length; may be stale as soon as it is read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
