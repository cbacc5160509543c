//! Bounded FIFO handoff from the dispatcher to the worker pool.
//!
//! A [`WorkQueue`] carries ready client file descriptors from the single
//! dispatcher thread to whichever worker wakes up to service them. It
//! blocks consumers on empty and never blocks producers: a full queue just
//! drops the item, and the dispatcher leaves that fd in the readiness set
//! so it is offered again on the next poll cycle.

use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::sync::{Condvar, Mutex};

/// One value handed from the dispatcher to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItem {
    /// A client socket with pending readiness.
    Fd(RawFd),
    /// Sentinel: no more work will ever arrive, exit the worker loop.
    Shutdown,
}

struct State {
    queue: VecDeque<WorkItem>,
    closed: bool,
}

pub struct WorkQueue {
    capacity: usize,
    state: Mutex<State>,
    not_empty: Condvar,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(State { queue: VecDeque::with_capacity(capacity), closed: false }),
            not_empty: Condvar::new(),
        }
    }

    /// Attempts to hand off `item` without blocking. Returns `false` if the
    /// queue is full or already closed; the caller is expected to retry the
    /// fd on a later readiness cycle rather than spin here.
    pub fn enqueue(&self, item: WorkItem) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.closed || state.queue.len() >= self.capacity {
            return false;
        }
        state.queue.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        true
    }

    /// Blocks until an item is available. Once [`close`](Self::close) has
    /// been called, drains whatever is left in FIFO order and then returns
    /// [`WorkItem::Shutdown`] forever after.
    pub fn dequeue(&self) -> WorkItem {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.queue.pop_front() {
                return item;
            }
            if state.closed {
                return WorkItem::Shutdown;
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Marks the queue closed and wakes every blocked consumer so each
    /// observes the shutdown sentinel at least once.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let q = WorkQueue::new(8);
        for fd in 0..5 {
            assert!(q.enqueue(WorkItem::Fd(fd)));
        }
        for fd in 0..5 {
            assert_eq!(q.dequeue(), WorkItem::Fd(fd));
        }
    }

    #[test]
    fn enqueue_fails_when_full() {
        let q = WorkQueue::new(2);
        assert!(q.enqueue(WorkItem::Fd(1)));
        assert!(q.enqueue(WorkItem::Fd(2)));
        assert!(!q.enqueue(WorkItem::Fd(3)));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn enqueue_rejected_after_close() {
        let q = WorkQueue::new(4);
        q.close();
        assert!(!q.enqueue(WorkItem::Fd(1)));
    }

    #[test]
    fn close_drains_then_yields_shutdown() {
        let q = WorkQueue::new(4);
        q.enqueue(WorkItem::Fd(42));
        q.close();
        assert_eq!(q.dequeue(), WorkItem::Fd(42));
        assert_eq!(q.dequeue(), WorkItem::Shutdown);
        assert_eq!(q.dequeue(), WorkItem::Shutdown);
    }

    #[test]
    fn close_wakes_every_blocked_consumer() {
        let q = Arc::new(WorkQueue::new(4));
        let consumers: Vec<_> = (0..8)
            .map(|_| {
                let q = Arc::clone(&q);
                thread::spawn(move || q.dequeue())
            })
            .collect();

        // Give every thread a fair chance to reach the blocking wait before
        // close() fires; a spurious early wakeup would just loop back.
        thread::sleep(std::time::Duration::from_millis(20));
        q.close();

        for handle in consumers {
            assert_eq!(handle.join().unwrap(), WorkItem::Shutdown);
        }
    }

    #[test]
    fn multi_producer_multi_consumer_sees_every_item() {
        let q = Arc::new(WorkQueue::new(64));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..16 {
                        while !q.enqueue(WorkItem::Fd(p * 16 + i)) {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let mut seen = Vec::new();
        while seen.len() < 64 {
            if let WorkItem::Fd(fd) = q.dequeue() {
                seen.push(fd);
            }
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 64);
    }
}
