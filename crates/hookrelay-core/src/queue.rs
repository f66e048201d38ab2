//! Event queue contract and in-process implementation.
//!
//! The queue is the handoff buffer between producers and delivery workers.
//! The contract is deliberately small so the in-process queue can be swapped
//! for a durable or distributed backend without touching the worker.

use std::sync::Arc;

use crossbeam_queue::SegQueue;

use crate::models::Event;

/// Multi-producer/multi-consumer FIFO of delivery jobs.
///
/// Ordering guarantee: events enqueued from a single producer are observed in
/// FIFO order with respect to that producer; no global ordering across
/// producers is guaranteed.
pub trait EventQueue: Send + Sync {
    /// Adds an event to the queue. Returns `false` only if the queue rejects
    /// the event (the in-process implementation never does).
    fn enqueue(&self, event: Event) -> bool;

    /// Removes and returns the next event, or `None` if the queue is empty.
    fn dequeue(&self) -> Option<Event>;

    /// Whether the queue currently holds no events.
    fn is_empty(&self) -> bool;

    /// Number of events currently queued.
    ///
    /// The value may be stale immediately after the call under concurrent
    /// access; it is intended for monitoring, not for coordination.
    fn len(&self) -> usize;
}

/// Lock-free in-process queue for single-instance deployments.
///
/// Unbounded: accepts all enqueues. Operators monitoring `len()` are the
/// backpressure mechanism; a durable replacement is expected to add bounded
/// capacity and producer blocking.
#[derive(Debug, Default)]
pub struct InMemoryEventQueue {
    inner: SegQueue<Event>,
}

impl InMemoryEventQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty queue behind an `Arc` for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl EventQueue for InMemoryEventQueue {
    fn enqueue(&self, event: Event) -> bool {
        self.inner.push(event);
        true
    }

    fn dequeue(&self) -> Option<Event> {
        self.inner.pop()
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}
