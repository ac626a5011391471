//! Request Queue
//!
//! Bounded FIFO of callers waiting for node capacity. Each entry carries a
//! one-shot responder; [`RequestQueue::drain`] hands grants to entries in
//! arrival order and stops at the first head entry that cannot be served,
//! so a later entry is never dispatched ahead of an earlier eligible one.
//!
//! The queue is generic over the grant type so it can be exercised without
//! a registry. The dispatcher instantiates it with node leases.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::complexity::Complexity;
use crate::error::{FarmError, FarmResult};

/// What selection needs to know about a waiting request
#[derive(Clone, Debug)]
pub struct QueuedRequest {
    /// Requested model id
    pub model: Option<String>,
    /// Estimated complexity
    pub complexity: Complexity,
    /// When the request entered the queue
    pub enqueued_at: Instant,
}

impl QueuedRequest {
    /// Entry stamped with the current time
    #[must_use]
    pub fn new(model: Option<String>, complexity: Complexity) -> Self {
        Self {
            model,
            complexity,
            enqueued_at: Instant::now(),
        }
    }
}

struct Entry<T> {
    id: u64,
    request: QueuedRequest,
    responder: oneshot::Sender<FarmResult<T>>,
}

/// Bounded FIFO of waiting requests
pub struct RequestQueue<T> {
    entries: Mutex<VecDeque<Entry<T>>>,
    capacity: usize,
    timeout: Duration,
    next_id: AtomicU64,
}

impl<T> std::fmt::Debug for RequestQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<T> RequestQueue<T> {
    /// Empty queue
    #[must_use]
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of waiting entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Maximum number of waiting entries
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How long an entry may wait
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Append an entry, or fail with [`FarmError::QueueFull`]
    pub fn enqueue(self: &Arc<Self>, request: QueuedRequest) -> FarmResult<QueueTicket<T>> {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            return Err(FarmError::QueueFull {
                capacity: self.capacity,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let enqueued_at = request.enqueued_at;
        entries.push_back(Entry {
            id,
            request,
            responder: tx,
        });
        debug!(queued = entries.len(), "request queued");

        Ok(QueueTicket {
            id,
            rx,
            queue: Arc::downgrade(self),
            enqueued_at,
            timeout: self.timeout,
        })
    }

    /// Serve waiting entries in order
    ///
    /// Expired heads are rejected with [`FarmError::QueueTimeout`] and
    /// skipped. For the first live head, `grant` is asked for capacity; a
    /// `None` stops the drain. Returns the number of entries served.
    ///
    /// `grant` runs under the queue lock and must not re-enter the queue.
    pub fn drain<F>(&self, mut grant: F) -> usize
    where
        F: FnMut(&QueuedRequest) -> Option<T>,
    {
        let mut orphaned = Vec::new();
        let mut served = 0;
        {
            let mut entries = self.entries.lock();
            loop {
                let Some(head) = entries.front() else { break };

                let waited = head.request.enqueued_at.elapsed();
                if waited > self.timeout {
                    if let Some(entry) = entries.pop_front() {
                        warn!(waited_ms = waited.as_millis() as u64, "queued request timed out");
                        let _ = entry.responder.send(Err(FarmError::QueueTimeout { waited }));
                    }
                    continue;
                }

                if head.responder.is_closed() {
                    entries.pop_front();
                    continue;
                }

                let Some(granted) = grant(&head.request) else { break };
                if let Some(entry) = entries.pop_front() {
                    served += 1;
                    if let Err(Ok(granted)) = entry.responder.send(Ok(granted)) {
                        orphaned.push(granted);
                    }
                }
            }
        }
        // Grants whose waiter vanished are dropped outside the lock
        drop(orphaned);
        served
    }

    fn remove(&self, id: u64) {
        self.entries.lock().retain(|e| e.id != id);
    }
}

/// A caller's place in the queue
///
/// Dropping the ticket removes the entry if it is still waiting.
pub struct QueueTicket<T> {
    id: u64,
    rx: oneshot::Receiver<FarmResult<T>>,
    queue: Weak<RequestQueue<T>>,
    enqueued_at: Instant,
    timeout: Duration,
}

impl<T> QueueTicket<T> {
    /// Wait for a grant, a rejection or the queue timeout
    pub async fn wait(mut self) -> FarmResult<T> {
        let remaining = self.timeout.saturating_sub(self.enqueued_at.elapsed());
        match tokio::time::timeout(remaining, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) | Err(_) => {
                let waited = self.enqueued_at.elapsed();
                warn!(waited_ms = waited.as_millis() as u64, "queued request timed out");
                Err(FarmError::QueueTimeout { waited })
            }
        }
    }
}

impl<T> Drop for QueueTicket<T> {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.upgrade() {
            queue.remove(self.id);
        }
    }
}
