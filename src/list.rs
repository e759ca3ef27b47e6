//! Mutex-protected double-ended list shared by pool readers and the reaper

use parking_lot::Mutex;
use std::collections::VecDeque;

/// A double-ended list whose operations are atomic with respect to each other.
///
/// Every operation takes the lock for the duration of a single deque call, so
/// no partial interleaving is observable.
pub struct ThreadSafeList<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> ThreadSafeList<T> {
    /// Create an empty list
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_front(&self, value: T) {
        self.inner.lock().push_front(value);
    }

    pub fn push_back(&self, value: T) {
        self.inner.lock().push_back(value);
    }

    pub fn pop_front(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    /// Take every element out of the list, front to back.
    ///
    /// The lock is released before the caller sees the items, so per-item
    /// cleanup never runs while other threads are blocked on the list.
    pub fn remove_all(&self) -> Vec<T> {
        let mut guard = self.inner.lock();
        guard.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn inspect<R>(&self, f: impl FnOnce(&VecDeque<T>) -> R) -> R {
        f(&self.inner.lock())
    }
}

impl<T> Default for ThreadSafeList<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_from_front() {
        let list = ThreadSafeList::new();
        list.push_back(1);
        list.push_back(2);
        list.push_front(0);

        assert_eq!(list.len(), 3);
        assert_eq!(list.pop_front(), Some(0));
        assert_eq!(list.pop_front(), Some(1));
        assert_eq!(list.pop_front(), Some(2));
        assert_eq!(list.pop_front(), None);
        assert!(list.is_empty());
    }

    #[test]
    fn test_remove_all_empties_list() {
        let list = ThreadSafeList::new();
        for i in 0..5 {
            list.push_back(i);
        }

        assert_eq!(list.remove_all(), vec![0, 1, 2, 3, 4]);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_concurrent_pushes() {
        let list = Arc::new(ThreadSafeList::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let list = Arc::clone(&list);
                thread::spawn(move || {
                    for i in 0..250 {
                        list.push_back(t * 1000 + i);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(list.len(), 1000);
    }
}
