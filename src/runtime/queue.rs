//! Task queue shared by the acceptor and the workers.
//!
//! A FIFO guarded by a mutex with two condition variables: `not_empty` wakes
//! consumers, `not_full` wakes producers when the queue is bounded. Each
//! item is popped by exactly one `take`, so no task is delivered twice.
//!
//! Closing the queue releases every blocked caller. Consumers keep draining
//! what was already queued and only see `None` once the queue is empty.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Error returned by [`TaskQueue::submit`]. The rejected item is handed back.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    /// The queue was closed before the item could be recorded.
    Closed(T),
    /// Storage for the item could not be allocated.
    Alloc(T),
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Multi-producer, multi-consumer blocking queue.
pub struct TaskQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    /// Zero means unbounded.
    capacity: usize,
}

impl<T> TaskQueue<T> {
    /// Create a queue. `capacity == 0` means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    // A worker that panicked while holding the lock leaves the queue itself
    // consistent: every mutation below is a single push/pop.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_full(&self, state: &State<T>) -> bool {
        self.capacity > 0 && state.items.len() >= self.capacity
    }

    /// Enqueue an item, blocking while a bounded queue is full.
    ///
    /// Returns once the item is recorded in the queue.
    pub fn submit(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.lock();

        while !state.closed && self.is_full(&state) {
            state = self.not_full.wait(state).unwrap_or_else(|e| e.into_inner());
        }

        if state.closed {
            return Err(PushError::Closed(item));
        }

        if state.items.try_reserve(1).is_err() {
            return Err(PushError::Alloc(item));
        }

        state.items.push_back(item);
        drop(state);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue an item, blocking until one is available.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn take(&self) -> Option<T> {
        let mut state = self.lock();

        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                if self.capacity > 0 {
                    self.not_full.notify_one();
                }
                return Some(item);
            }

            if state.closed {
                return None;
            }

            state = self.not_empty.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Close the queue and wake every blocked producer and consumer.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_single_thread() {
        let queue = TaskQueue::new(0);
        for i in 0..5 {
            queue.submit(i).unwrap();
        }
        assert_eq!(queue.len(), 5);

        let drained: Vec<_> = (0..5).map(|_| queue.take().unwrap()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_take_blocks_until_submit() {
        let queue = Arc::new(TaskQueue::new(0));
        let (tx, rx) = mpsc::channel();

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                tx.send(queue.take()).unwrap();
            })
        };

        // Nothing queued yet, consumer must still be waiting
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        queue.submit(42).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Some(42));
        consumer.join().unwrap();
    }

    #[test]
    fn test_close_wakes_blocked_consumers() {
        let queue: Arc<TaskQueue<u32>> = Arc::new(TaskQueue::new(0));

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.take())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        queue.close();

        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), None);
        }
    }

    #[test]
    fn test_close_drains_before_none() {
        let queue = TaskQueue::new(0);
        queue.submit("a").unwrap();
        queue.submit("b").unwrap();
        queue.close();

        assert_eq!(queue.submit("c"), Err(PushError::Closed("c")));
        assert_eq!(queue.take(), Some("a"));
        assert_eq!(queue.take(), Some("b"));
        assert_eq!(queue.take(), None);
    }

    #[test]
    fn test_bounded_submit_blocks_when_full() {
        let queue = Arc::new(TaskQueue::new(1));
        queue.submit(1).unwrap();

        let (tx, rx) = mpsc::channel();
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                queue.submit(2).unwrap();
                tx.send(()).unwrap();
            })
        };

        // Full: the second submit cannot complete yet
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        assert_eq!(queue.take(), Some(1));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(queue.take(), Some(2));
        producer.join().unwrap();
    }

    #[test]
    fn test_close_releases_blocked_producer() {
        let queue = Arc::new(TaskQueue::new(1));
        queue.submit(1).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.submit(2))
        };

        thread::sleep(Duration::from_millis(20));
        queue.close();

        assert_eq!(producer.join().unwrap(), Err(PushError::Closed(2)));
    }

    #[test]
    fn test_concurrent_producers_and_consumers() {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: usize = 500;

        let queue = Arc::new(TaskQueue::new(16));

        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(item) = queue.take() {
                        seen.push(item);
                    }
                    seen
                })
            })
            .collect();

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        queue.submit(p * PER_PRODUCER + i).unwrap();
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        queue.close();

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.join().unwrap());
        }

        // Every item delivered exactly once
        assert_eq!(all.len(), PRODUCERS * PER_PRODUCER);
        let unique: HashSet<_> = all.into_iter().collect();
        assert_eq!(unique.len(), PRODUCERS * PER_PRODUCER);
    }
}
