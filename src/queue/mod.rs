//! Fixed-capacity FIFO handoff between producers and workers.
//!
//! [`BoundedQueue`] is the single synchronization point of a pipeline. Free
//! slots are tracked by a [`Semaphore`]: producers take a slot before pushing,
//! consumers give it back after popping. Closing the semaphore is what releases
//! producers that are suspended on a full queue.
//!
//! | Operation                          | Full queue          | Closed queue          |
//! |------------------------------------|---------------------|-----------------------|
//! | [`enqueue`](BoundedQueue::enqueue) | suspends            | `Err(Closed(item))`   |
//! | [`try_enqueue`](BoundedQueue::try_enqueue) | `Err(Full(item))` | `Err(Closed(item))` |
//! | [`dequeue`](BoundedQueue::dequeue) | suspends while empty | drains, then `None`   |

use std::collections::VecDeque;
use std::fmt;
use std::pin::pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::{Notify, Semaphore, TryAcquireError};

/// Why an item was not accepted. The rejected item is handed back.
#[derive(Error)]
pub enum QueueError<T> {
    #[error("queue is full")]
    Full(T),

    #[error("queue is closed")]
    Closed(T),
}

impl<T> QueueError<T> {
    /// Recovers the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            QueueError::Full(item) | QueueError::Closed(item) => item,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, QueueError::Full(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, QueueError::Closed(_))
    }
}

// Hand-written so the error is usable for payloads that are not `Debug`.
impl<T> fmt::Debug for QueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Full(_) => f.write_str("Full(..)"),
            QueueError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

/// A bounded multi-producer, multi-consumer FIFO queue.
///
/// # Examples
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use spool::queue::BoundedQueue;
///
/// let queue = BoundedQueue::new(2);
/// queue.enqueue("a").await.unwrap();
/// queue.try_enqueue("b").unwrap();
/// assert!(queue.try_enqueue("c").unwrap_err().is_full());
///
/// queue.close();
/// assert_eq!(queue.dequeue().await, Some("a"));
/// assert_eq!(queue.dequeue().await, Some("b"));
/// assert_eq!(queue.dequeue().await, None);
/// # }
/// ```
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    // One permit per free slot.
    slots: Semaphore,
    available: Notify,
    closed: AtomicBool,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items. A capacity of zero is
    /// raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            slots: Semaphore::new(capacity),
            available: Notify::new(),
            closed: AtomicBool::new(false),
            capacity,
        }
    }

    /// Appends `item`, suspending the caller while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] if the queue is closed before or while
    /// waiting for a free slot.
    pub async fn enqueue(&self, item: T) -> Result<(), QueueError<T>> {
        match self.slots.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return Err(QueueError::Closed(item)),
        }
        self.push(item)
    }

    /// Appends `item` only if a slot is free right now. Never suspends.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] when no slot is free, or
    /// [`QueueError::Closed`] once the queue is closed.
    pub fn try_enqueue(&self, item: T) -> Result<(), QueueError<T>> {
        match self.slots.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(TryAcquireError::NoPermits) => return Err(QueueError::Full(item)),
            Err(TryAcquireError::Closed) => return Err(QueueError::Closed(item)),
        }
        self.push(item)
    }

    // Caller already owns a slot.
    fn push(&self, item: T) -> Result<(), QueueError<T>> {
        {
            let mut items = self.lock();
            // `close` flips the flag under this lock, so a producer that won a
            // slot just before closing cannot sneak an item in afterwards.
            if self.closed.load(Ordering::Acquire) {
                return Err(QueueError::Closed(item));
            }
            items.push_back(item);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Removes the oldest item, waiting until one is available.
    ///
    /// After [`close`](Self::close) the remaining items are still handed out;
    /// `None` is returned once the closed queue is empty.
    pub async fn dequeue(&self) -> Option<T> {
        loop {
            let mut notified = pin!(self.available.notified());
            notified.as_mut().enable();

            {
                let mut items = self.lock();
                if let Some(item) = items.pop_front() {
                    self.slots.add_permits(1);
                    if !items.is_empty() {
                        // Pass the wakeup on so sibling consumers are not starved.
                        self.available.notify_one();
                    }
                    return Some(item);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Closes the queue. Irreversible; calling it again has no effect.
    ///
    /// Suspended producers fail with [`QueueError::Closed`] and idle consumers
    /// wake up to drain what is left.
    pub fn close(&self) {
        {
            let _items = self.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
        }
        self.slots.close();
        self.available.notify_waiters();
    }

    /// Removes every buffered item and returns how many were discarded.
    pub fn clear(&self) -> usize {
        let drained = {
            let mut items = self.lock();
            let drained = items.len();
            items.clear();
            drained
        };
        self.slots.add_permits(drained);
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of items currently buffered.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        // Critical sections never panic; poisoning is ignored.
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}
