//! Bounded reader -> dispatcher handoff.
//!
//! One producer (the reader thread) and one consumer (the dispatcher
//! thread) for the lifetime of the queue. The handoff is lossy by policy:
//! when the consumer cannot keep up the producer drops the message, counts
//! it, and tells the user - latency is prioritized over completeness.

use std::time::Instant;

use crossbeam::queue::ArrayQueue;

use crate::wire::ParsedMessage;

/// A parsed message plus the instant the reader took it off the wire, so
/// the dispatcher can measure handoff latency.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub message: ParsedMessage,
    pub received_at: Instant,
}

impl Envelope {
    pub fn new(message: ParsedMessage) -> Self {
        Self {
            message,
            received_at: Instant::now(),
        }
    }
}

/// Fixed-capacity handoff queue. A `try_push` that returns true
/// happens-before the `pop` that returns the same envelope.
#[derive(Debug)]
pub(crate) struct IngressQueue {
    inner: ArrayQueue<Envelope>,
}

impl IngressQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: ArrayQueue::new(capacity),
        }
    }

    /// Non-blocking push; false iff the queue is full. The rejected
    /// envelope is dropped by the caller - there is no lossless fallback.
    #[inline]
    pub fn try_push(&self, envelope: Envelope) -> bool {
        self.inner.push(envelope).is_ok()
    }

    /// Non-blocking pop; `None` iff the queue is empty.
    #[inline]
    pub fn pop(&self) -> Option<Envelope> {
        self.inner.pop()
    }

    /// Best-effort depth snapshot.
    #[inline]
    pub fn depth(&self) -> usize {
        self.inner.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
