//! Mutex-guarded FIFO work queues.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use lamb_frame::{envelope, Command, Envelope};

/// A record moved through a session: the command it arrived under and its
/// body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// `Submit`, `Report` or `Deliver`.
    pub kind: Command,
    /// Record body, without the envelope header.
    pub payload: Bytes,
}

impl QueueItem {
    /// Create a new queue item.
    pub fn new(kind: Command, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Encode back into the envelope it arrived as.
    pub fn to_wire(&self) -> lamb_frame::Result<Bytes> {
        envelope::encode(self.kind, &self.payload)
    }
}

impl From<Envelope> for QueueItem {
    fn from(envelope: Envelope) -> Self {
        Self {
            kind: envelope.command,
            payload: envelope.body,
        }
    }
}

/// FIFO queue shared between session workers and backend consumers.
///
/// Every operation takes the queue's own lock; no two queues share one.
/// The length is mirrored in an atomic so it can be read without locking.
/// A poisoned lock is recovered rather than propagated.
#[derive(Debug)]
pub struct WorkQueue<T> {
    name: String,
    items: Mutex<VecDeque<T>>,
    len: AtomicUsize,
}

impl<T> WorkQueue<T> {
    /// Create a new empty queue.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Mutex::new(VecDeque::new()),
            len: AtomicUsize::new(0),
        }
    }

    /// Append an item to the tail.
    pub fn push(&self, item: T) {
        let mut items = self.lock();
        items.push_back(item);
        self.len.store(items.len(), Ordering::Release);
    }

    /// Take the head item, or `None` immediately if the queue is empty.
    pub fn pop(&self) -> Option<T> {
        let mut items = self.lock();
        let item = items.pop_front();
        self.len.store(items.len(), Ordering::Release);
        item
    }

    /// Put an item back at the head, ahead of everything queued since it
    /// was popped.
    pub fn restore(&self, item: T) {
        let mut items = self.lock();
        items.push_front(item);
        self.len.store(items.len(), Ordering::Release);
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn fifo_order() {
        let queue = WorkQueue::new("mt");
        queue.push(1);
        queue.push(2);
        queue.push(3);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn restore_goes_to_head() {
        let queue = WorkQueue::new("mo");
        queue.push("a");
        queue.push("b");

        let head = queue.pop().expect("queue should not be empty");
        queue.push("c");
        queue.restore(head);

        assert_eq!(queue.pop(), Some("a"));
        assert_eq!(queue.pop(), Some("b"));
        assert_eq!(queue.pop(), Some("c"));
    }

    #[test]
    fn queue_item_wire_matches_envelope() {
        let item = QueueItem::new(Command::Report, Bytes::from_static(b"delivrd"));
        let wire = item.to_wire().expect("item should encode");
        let envelope = Envelope::decode(&wire).expect("wire should decode");
        assert_eq!(QueueItem::from(envelope), item);
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let queue = Arc::new(WorkQueue::new("ismg"));
        let producers: Vec<_> = (0..4)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for n in 0..250 {
                        queue.push(worker * 1000 + n);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().expect("producer should finish");
        }

        assert_eq!(queue.len(), 1000);
        let mut seen = Vec::new();
        while let Some(item) = queue.pop() {
            seen.push(item);
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let queue = Arc::new(WorkQueue::new("server"));
        queue.push(1);

        let poisoner = Arc::clone(&queue);
        let _ = thread::spawn(move || {
            let _guard = poisoner.items.lock().unwrap();
            panic!("poison the queue lock");
        })
        .join();

        queue.push(2);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
    }
}
